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

//! Raw spinning lock.

use core::{
	hint,
	sync::atomic::{
		AtomicBool,
		Ordering::{Acquire, Release},
	},
};

/// A raw spinning lock. This is the lowest level locking primitive of the kernel.
///
/// This structure does not wrap any data. Its purpose is to be used as a building block for
/// higher level primitives.
pub struct RawSpin {
	locked: AtomicBool,
}

impl RawSpin {
	/// Creates a new, unlocked instance.
	pub const fn new() -> Self {
		Self {
			locked: AtomicBool::new(false),
		}
	}

	/// Acquires the lock, spinning until available.
	pub fn lock(&self) {
		while self
			.locked
			.compare_exchange_weak(false, true, Acquire, Acquire)
			.is_err()
		{
			hint::spin_loop();
		}
	}

	/// Attempts to acquire the lock without spinning.
	///
	/// The function returns `true` if the lock has been acquired.
	pub fn try_lock(&self) -> bool {
		self.locked
			.compare_exchange(false, true, Acquire, Acquire)
			.is_ok()
	}

	/// Releases the lock.
	///
	/// # Safety
	///
	/// The lock must be held by the current context.
	pub unsafe fn unlock(&self) {
		self.locked.store(false, Release);
	}
}

impl Default for RawSpin {
	fn default() -> Self {
		Self::new()
	}
}
