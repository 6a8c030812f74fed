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

//! An `Arc` with fallible allocation.

use crate::errno::{AllocError, AllocResult};
use core::{
	fmt,
	hash::{Hash, Hasher},
	marker::Unsize,
	ops::{CoerceUnsized, Deref},
};

/// A thread-safe reference-counted pointer.
///
/// Contrary to the standard library `Arc`, creating an instance is fallible.
pub struct Arc<T: ?Sized>(alloc::sync::Arc<T>);

impl<T> Arc<T> {
	/// Allocates the value on the heap with a reference counter.
	pub fn new(value: T) -> AllocResult<Self> {
		alloc::sync::Arc::try_new(value)
			.map(Self)
			.map_err(|_| AllocError)
	}
}

impl<T: ?Sized> Arc<T> {
	/// Returns the number of strong references to the value.
	pub fn strong_count(this: &Self) -> usize {
		alloc::sync::Arc::strong_count(&this.0)
	}

	/// Tells whether both instances point to the same allocation.
	pub fn ptr_eq(this: &Self, other: &Self) -> bool {
		alloc::sync::Arc::ptr_eq(&this.0, &other.0)
	}

	/// Creates a new weak reference to the value.
	pub fn downgrade(this: &Self) -> Weak<T> {
		Weak(alloc::sync::Arc::downgrade(&this.0))
	}

	/// Returns a pointer to the inner value.
	pub fn as_ptr(this: &Self) -> *const T {
		alloc::sync::Arc::as_ptr(&this.0)
	}
}

impl<T: ?Sized> Clone for Arc<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}

impl<T: ?Sized> Deref for Arc<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<T: ?Sized> AsRef<T> for Arc<T> {
	fn as_ref(&self) -> &T {
		&self.0
	}
}

impl<T: ?Sized + Unsize<U>, U: ?Sized> CoerceUnsized<Arc<U>> for Arc<T> {}

impl<T: ?Sized + PartialEq> PartialEq for Arc<T> {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl<T: ?Sized + Eq> Eq for Arc<T> {}

impl<T: ?Sized + Hash> Hash for Arc<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.hash(state)
	}
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Arc<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&self.0, fmt)
	}
}

impl<T: ?Sized + fmt::Display> fmt::Display for Arc<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, fmt)
	}
}

/// A non-owning reference to a value behind an [`Arc`].
pub struct Weak<T: ?Sized>(alloc::sync::Weak<T>);

impl<T: ?Sized> Weak<T> {
	/// Attempts to upgrade to an [`Arc`].
	///
	/// If the value has been dropped, the function returns `None`.
	pub fn upgrade(&self) -> Option<Arc<T>> {
		self.0.upgrade().map(Arc)
	}
}

impl<T: ?Sized> Clone for Weak<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
