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

//! Reinterpretation of byte slices as structures, for on-disk and wire formats.

use core::{mem::size_of, slice};

/// A type for which any bit pattern is a valid value.
///
/// # Safety
///
/// The type must be `#[repr(C)]` or `#[repr(transparent)]` and must not contain any field whose
/// type restricts the valid bit patterns (references, `bool`, enums, ...). Implement through
/// `#[derive(AnyRepr)]` from the `macros` crate.
pub unsafe trait AnyRepr {}

unsafe impl AnyRepr for u8 {}
unsafe impl AnyRepr for u16 {}
unsafe impl AnyRepr for u32 {}
unsafe impl AnyRepr for u64 {}
unsafe impl AnyRepr for i8 {}
unsafe impl AnyRepr for i16 {}
unsafe impl AnyRepr for i32 {}
unsafe impl AnyRepr for i64 {}
unsafe impl<T: AnyRepr, const N: usize> AnyRepr for [T; N] {}

/// Reinterprets the given slice of bytes as the type `T`.
///
/// If the slice is too small or misaligned, the function returns `None`.
pub fn from_bytes<T: AnyRepr>(slice: &[u8]) -> Option<&T> {
	let ptr = slice.as_ptr();
	if slice.len() >= size_of::<T>() && ptr.is_aligned_to(align_of::<T>()) {
		// The slice is large enough and aligned, and any representation is valid
		Some(unsafe { &*(ptr as *const T) })
	} else {
		None
	}
}

/// Returns the byte representation of the given value.
pub fn as_bytes<T: AnyRepr>(val: &T) -> &[u8] {
	unsafe { slice::from_raw_parts(val as *const _ as *const u8, size_of::<T>()) }
}

/// Reinterprets the given slice of bytes as a slice of `T`.
///
/// Trailing bytes that do not fit a whole element are ignored.
pub fn slice_from_bytes<T: AnyRepr>(slice: &[u8]) -> Option<&[T]> {
	let ptr = slice.as_ptr();
	if !ptr.is_aligned_to(align_of::<T>()) {
		return None;
	}
	let len = slice.len() / size_of::<T>();
	Some(unsafe { slice::from_raw_parts(ptr as *const T, len) })
}
