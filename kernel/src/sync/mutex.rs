/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Sonata.
 *
 * Sonata is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Sonata is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Sonata. If not, see <https://www.gnu.org/licenses/>.
 */

//! Mutual exclusion primitives protecting a value.
//!
//! [`Mutex`] spins while waiting. [`IntMutex`] additionally masks interrupts on the current CPU
//! while held, making it safe to share data with interrupt handlers: a lock that is also taken
//! from an interrupt context MUST be an [`IntMutex`], otherwise the handler may deadlock against
//! the interrupted code.

use crate::{arch::x86, sync::spin::RawSpin};
use core::{
	cell::UnsafeCell,
	fmt,
	ops::{Deref, DerefMut},
};

/// Mutual exclusion for a value.
///
/// The `INT` generic parameter tells whether interrupts are allowed while the mutex is held.
pub struct Mutex<T: ?Sized, const INT: bool = true> {
	spin: RawSpin,
	data: UnsafeCell<T>,
}

/// A [`Mutex`] masking interrupts while held.
pub type IntMutex<T> = Mutex<T, false>;

unsafe impl<T: ?Sized + Send, const INT: bool> Sync for Mutex<T, INT> {}

impl<T, const INT: bool> Mutex<T, INT> {
	/// Creates a new instance wrapping the given `data`.
	pub const fn new(data: T) -> Self {
		Self {
			spin: RawSpin::new(),
			data: UnsafeCell::new(data),
		}
	}

	/// Consumes the mutex and returns the inner value.
	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T: Default, const INT: bool> Default for Mutex<T, INT> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<T: ?Sized, const INT: bool> Mutex<T, INT> {
	/// Acquires the mutex, spinning until available.
	///
	/// The returned guard releases the mutex when dropped.
	pub fn lock(&self) -> MutexGuard<'_, T, INT> {
		let int_state = if !INT {
			let enabled = x86::interrupts_enabled();
			x86::cli();
			enabled
		} else {
			false
		};
		self.spin.lock();
		MutexGuard {
			mutex: self,
			int_state,
		}
	}

	/// Attempts to acquire the mutex without spinning.
	pub fn try_lock(&self) -> Option<MutexGuard<'_, T, INT>> {
		let int_state = if !INT {
			let enabled = x86::interrupts_enabled();
			x86::cli();
			enabled
		} else {
			false
		};
		if self.spin.try_lock() {
			Some(MutexGuard {
				mutex: self,
				int_state,
			})
		} else {
			if !INT && int_state {
				x86::sti();
			}
			None
		}
	}
}

/// Releases the associated [`Mutex`] when dropped.
pub struct MutexGuard<'m, T: ?Sized, const INT: bool> {
	mutex: &'m Mutex<T, INT>,
	/// Interrupt state to be restored on release.
	int_state: bool,
}

impl<T: ?Sized, const INT: bool> Deref for MutexGuard<'_, T, INT> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		unsafe { &*self.mutex.data.get() }
	}
}

impl<T: ?Sized, const INT: bool> DerefMut for MutexGuard<'_, T, INT> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		unsafe { &mut *self.mutex.data.get() }
	}
}

impl<T: ?Sized, const INT: bool> !Send for MutexGuard<'_, T, INT> {}

unsafe impl<T: ?Sized + Sync, const INT: bool> Sync for MutexGuard<'_, T, INT> {}

impl<T: ?Sized, const INT: bool> Drop for MutexGuard<'_, T, INT> {
	fn drop(&mut self) {
		unsafe {
			self.mutex.spin.unlock();
		}
		if !INT && self.int_state {
			x86::sti();
		}
	}
}

impl<T: ?Sized + fmt::Debug, const INT: bool> fmt::Debug for Mutex<T, INT> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let guard = self.lock();
		fmt::Debug::fmt(&*guard, f)
	}
}
