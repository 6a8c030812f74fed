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

//! A cell initialized once at boot time.

use core::{
	cell::UnsafeCell,
	mem::MaybeUninit,
	sync::atomic::{
		AtomicBool,
		Ordering::{Acquire, Release},
	},
};

/// A value initialized exactly once, at kernel initialization.
pub struct OnceInit<T> {
	init: AtomicBool,
	val: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Sync> Sync for OnceInit<T> {}

impl<T> OnceInit<T> {
	/// Creates a new, uninitialized instance.
	///
	/// # Safety
	///
	/// Using the value before it is initialized is undefined behaviour.
	pub const unsafe fn new() -> Self {
		Self {
			init: AtomicBool::new(false),
			val: UnsafeCell::new(MaybeUninit::uninit()),
		}
	}

	/// Initializes with the given value.
	///
	/// # Safety
	///
	/// This function must be called exactly once, before any call to [`Self::get`], and without
	/// concurrency.
	pub unsafe fn init(this: &Self, val: T) {
		(*this.val.get()).write(val);
		this.init.store(true, Release);
	}

	/// Returns the inner value.
	///
	/// If the value has not been initialized, the function panics.
	pub fn get(&self) -> &T {
		if !self.init.load(Acquire) {
			panic!("use of uninitialized OnceInit");
		}
		unsafe { (*self.val.get()).assume_init_ref() }
	}

	/// Tells whether the value has been initialized.
	pub fn is_init(&self) -> bool {
		self.init.load(Acquire)
	}
}
