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

//! A `Box` with fallible allocation.

use crate::errno::{AllocError, AllocResult};
use core::{
	fmt,
	marker::Unsize,
	ops::{CoerceUnsized, Deref, DerefMut},
};

/// An owned heap allocation.
///
/// Contrary to the standard library `Box`, creating an instance is fallible.
pub struct Box<T: ?Sized>(alloc::boxed::Box<T>);

impl<T> Box<T> {
	/// Allocates memory on the heap and moves `value` into it.
	pub fn new(value: T) -> AllocResult<Self> {
		alloc::boxed::Box::try_new(value)
			.map(Self)
			.map_err(|_| AllocError)
	}

	/// Returns the inner value.
	pub fn into_inner(b: Self) -> T {
		*b.0
	}
}

impl<T: ?Sized> Deref for Box<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<T: ?Sized> DerefMut for Box<T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

impl<T: ?Sized + Unsize<U>, U: ?Sized> CoerceUnsized<Box<U>> for Box<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Box<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&self.0, fmt)
	}
}

impl<T: ?Sized + fmt::Display> fmt::Display for Box<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, fmt)
	}
}
