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

//! Userspace memory access.
//!
//! Before copying, the accessed range is checked against the current process's memory space and
//! the touched pages are populated, so that the copy itself cannot fault.

use crate::{memory::VirtAddr, process::Process, syscall::FromSyscallArg};
use core::{fmt, marker::PhantomData, mem::size_of, ptr, ptr::NonNull};
use utils::{
	bytes::AnyRepr,
	collections::{string::String, vec::Vec},
	errno,
	errno::EResult,
};

/// Checks that the range `[addr, addr + len)` of the current process is accessible, populating
/// it for reading or writing, and returns an error otherwise.
fn check_and_populate(addr: VirtAddr, len: usize, write: bool) -> EResult<()> {
	if len == 0 {
		return Ok(());
	}
	let proc = Process::current();
	let mem_space = proc.mem_space().ok_or_else(|| errno!(EFAULT))?;
	mem_space.populate(addr, len, write)
}

/// A pointer to a value in userspace.
#[derive(Clone, Copy)]
pub struct UserPtr<T: Sized + AnyRepr>(pub Option<NonNull<T>>);

impl<T: Sized + AnyRepr> FromSyscallArg for UserPtr<T> {
	fn from_syscall_arg(arg: usize) -> Self {
		Self(NonNull::new(ptr::with_exposed_provenance_mut(arg)))
	}
}

impl<T: Sized + AnyRepr> UserPtr<T> {
	/// Creates an instance from a raw user address.
	pub fn from_user(addr: usize) -> Self {
		Self(NonNull::new(ptr::with_exposed_provenance_mut(addr)))
	}

	/// Tells whether the pointer is null.
	pub fn is_null(&self) -> bool {
		self.0.is_none()
	}

	/// Copies the value from userspace.
	///
	/// If the pointer is null, the function returns `None`. If the memory cannot be accessed,
	/// the function returns [`errno::EFAULT`].
	pub fn copy_from_user(&self) -> EResult<Option<T>> {
		let Some(ptr) = self.0 else {
			return Ok(None);
		};
		check_and_populate(VirtAddr::from(ptr), size_of::<T>(), false)?;
		Ok(Some(unsafe { ptr.as_ptr().read_unaligned() }))
	}

	/// Copies the value to userspace.
	///
	/// If the pointer is null, the function does nothing. If the memory cannot be accessed or
	/// written, the function returns [`errno::EFAULT`].
	pub fn copy_to_user(&self, val: &T) -> EResult<()> {
		let Some(ptr) = self.0 else {
			return Ok(());
		};
		check_and_populate(VirtAddr::from(ptr), size_of::<T>(), true)?;
		unsafe {
			ptr.as_ptr().write_unaligned(ptr::read(val));
		}
		Ok(())
	}
}

impl<T: Sized + AnyRepr> fmt::Debug for UserPtr<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.0 {
			Some(ptr) => write!(fmt, "{ptr:p}"),
			None => write!(fmt, "NULL"),
		}
	}
}

/// A slice of values in userspace.
#[derive(Clone, Copy)]
pub struct UserSlice<T: Sized + AnyRepr> {
	ptr: Option<NonNull<T>>,
	len: usize,
	phantom: PhantomData<T>,
}

impl<T: Sized + AnyRepr> UserSlice<T> {
	/// Creates an instance from a raw user pointer and a length in elements.
	pub fn from_user(ptr: usize, len: usize) -> Self {
		Self {
			ptr: NonNull::new(ptr::with_exposed_provenance_mut(ptr)),
			len,
			phantom: PhantomData,
		}
	}

	/// Returns the length of the slice in elements.
	pub fn len(&self) -> usize {
		self.len
	}

	/// Tells whether the slice is empty or null.
	pub fn is_empty(&self) -> bool {
		self.ptr.is_none() || self.len == 0
	}

	/// Copies the slice's content from userspace.
	pub fn copy_from_user(&self) -> EResult<Vec<T>> {
		let Some(ptr) = self.ptr else {
			return Err(errno!(EFAULT));
		};
		let size = self.len * size_of::<T>();
		check_and_populate(VirtAddr::from(ptr), size, false)?;
		let mut v = Vec::with_capacity(self.len)?;
		for i in 0..self.len {
			v.push(unsafe { ptr.as_ptr().add(i).read_unaligned() })?;
		}
		Ok(v)
	}

	/// Copies `src` to userspace.
	///
	/// If `src` is larger than the slice, the copy is truncated.
	pub fn copy_to_user(&self, src: &[T]) -> EResult<usize> {
		let Some(ptr) = self.ptr else {
			return Err(errno!(EFAULT));
		};
		let len = usize::min(self.len, src.len());
		check_and_populate(VirtAddr::from(ptr), len * size_of::<T>(), true)?;
		unsafe {
			ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), len);
		}
		Ok(len)
	}
}

impl<T: Sized + AnyRepr> fmt::Debug for UserSlice<T> {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.ptr {
			Some(ptr) => write!(fmt, "{ptr:p} (len: {})", self.len),
			None => write!(fmt, "NULL"),
		}
	}
}

/// A NUL-terminated string in userspace.
#[derive(Clone, Copy)]
pub struct UserString(pub Option<NonNull<u8>>);

impl FromSyscallArg for UserString {
	fn from_syscall_arg(arg: usize) -> Self {
		Self(NonNull::new(ptr::with_exposed_provenance_mut(arg)))
	}
}

impl UserString {
	/// Creates an instance from a raw user address.
	pub fn from_user(addr: usize) -> Self {
		Self(NonNull::new(ptr::with_exposed_provenance_mut(addr)))
	}

	/// Copies the string from userspace, up to the NUL byte.
	///
	/// If the pointer is null, the function returns [`errno::EFAULT`].
	pub fn copy_from_user(&self) -> EResult<String> {
		let Some(ptr) = self.0 else {
			return Err(errno!(EFAULT));
		};
		let mut s = String::new();
		let mut i = 0;
		loop {
			// Populate and read one page at a time
			let addr = VirtAddr::from(ptr) + i;
			let page_remain =
				utils::limits::PAGE_SIZE - (addr.0 % utils::limits::PAGE_SIZE);
			check_and_populate(addr, page_remain, false)?;
			for j in 0..page_remain {
				let b = unsafe { ptr.as_ptr().add(i + j).read() };
				if b == 0 {
					return Ok(s);
				}
				s.push(b)?;
			}
			i += page_remain;
		}
	}
}

impl fmt::Debug for UserString {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.0 {
			Some(ptr) => write!(fmt, "{ptr:p}"),
			None => write!(fmt, "NULL"),
		}
	}
}
