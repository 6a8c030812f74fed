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

//! Memory management.
//!
//! The virtual address space is divided in two halves:
//! - Userspace: below [`PROCESS_END`], private to the currently running process
//! - Kernelspace: above [`KERNEL_BEGIN`], shared across all processes
//!
//! The kernelspace starts with a direct mapping of the whole physical memory, followed by the
//! reservation arenas (see [`arena`]).

use core::{
	fmt,
	mem::size_of,
	ops::{Add, Deref, DerefMut, Sub},
	ptr,
	ptr::NonNull,
};

pub mod arena;
pub mod cache;
pub mod frame;
pub mod malloc;
pub mod user;
pub mod vmem;

/// Address of the end of the virtual memory reserved to the process.
pub const PROCESS_END: VirtAddr = VirtAddr(0x800000000000);
/// Address of the beginning of the kernelspace, where the whole physical memory is mapped.
pub const KERNEL_BEGIN: VirtAddr = VirtAddr(0xffff800000000000);

/// An address on physical memory.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
	/// Converts the physical address to a virtual address through the kernel's direct mapping.
	///
	/// If the resulting address does not fit the kernelspace, the function returns `None`.
	pub fn kernel_to_virtual(self) -> Option<VirtAddr> {
		self.0.checked_add(KERNEL_BEGIN.0).map(VirtAddr)
	}
}

/// An address on virtual memory.
///
/// This would usually be represented by a pointer, but in some cases a virtual address has to
/// be manipulated without being dereferenceable.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(pub usize);

impl<T> From<*const T> for VirtAddr {
	fn from(ptr: *const T) -> Self {
		Self(ptr as usize)
	}
}

impl<T> From<*mut T> for VirtAddr {
	fn from(ptr: *mut T) -> Self {
		Self(ptr as usize)
	}
}

impl<T> From<NonNull<T>> for VirtAddr {
	fn from(ptr: NonNull<T>) -> Self {
		Self(ptr.as_ptr() as usize)
	}
}

impl VirtAddr {
	/// Converts the kernel virtual address to a physical address.
	///
	/// If the address is outside the direct mapping, the function returns `None`.
	pub fn kernel_to_physical(self) -> Option<PhysAddr> {
		self.0.checked_sub(KERNEL_BEGIN.0).map(PhysAddr)
	}

	/// Returns a mutable pointer to the virtual address.
	pub fn as_ptr<T>(self) -> *mut T {
		ptr::with_exposed_provenance_mut(self.0)
	}
}

macro_rules! addr_impl {
	($name:ident) => {
		impl $name {
			/// Tells whether the address is null.
			pub fn is_null(self) -> bool {
				self.0 == 0
			}

			/// Tells whether the address is aligned to `align`.
			pub fn is_aligned_to(self, align: usize) -> bool {
				self.0 % align == 0
			}

			/// Returns the next address aligned to `align`.
			///
			/// If `self` is already aligned, the function returns `self`.
			pub fn align_to(self, align: usize) -> Self {
				Self(self.0.next_multiple_of(align))
			}

			/// Returns the previous address aligned to `align`.
			///
			/// If `self` is already aligned, the function returns `self`.
			pub fn down_align_to(self, align: usize) -> Self {
				Self(self.0 & !(align - 1))
			}
		}

		impl Deref for $name {
			type Target = usize;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}

		impl DerefMut for $name {
			fn deref_mut(&mut self) -> &mut Self::Target {
				&mut self.0
			}
		}

		impl Add<usize> for $name {
			type Output = Self;

			/// Adds the given offset in bytes, wrapping on overflow.
			fn add(self, off: usize) -> Self::Output {
				Self(self.0.wrapping_add(off))
			}
		}

		impl Sub<usize> for $name {
			type Output = Self;

			/// Subtracts the given offset in bytes, wrapping on overflow.
			fn sub(self, off: usize) -> Self::Output {
				Self(self.0.wrapping_sub(off))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
				const LEN: usize = size_of::<usize>() * 2;
				write!(fmt, "{:0LEN$x}", self.0)
			}
		}
	};
}

addr_impl!(PhysAddr);
addr_impl!(VirtAddr);
