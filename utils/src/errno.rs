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

//! Kernel errors are represented by an integer errno, reported to userspace as the negated
//! return value of the system call that failed.

pub use core::alloc::AllocError;
use core::fmt;

/// Result with an [`Errno`] as error type.
pub type EResult<T> = Result<T, Errno>;
/// Result of a fallible allocation.
pub type AllocResult<T> = Result<T, AllocError>;

/// Collects a fallible iterator into a fallible collection, keeping the first error if any.
///
/// This type works around the inability to implement [`FromIterator`] for `Result` on foreign
/// fallible collections.
pub struct CollectResult<T>(pub AllocResult<T>);

impl<T, C: crate::collections::TryFromIterator<T>> FromIterator<T> for CollectResult<C> {
	fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
		Self(C::try_from_iter(iter.into_iter()))
	}
}

macro_rules! errnos {
	($(($name:ident, $id:expr, $desc:expr)),*) => {
		$(
			#[doc = $desc]
			pub const $name: i32 = $id;
		)*

		/// Returns the description matching the given errno.
		fn strerror(errno: i32) -> &'static str {
			match errno {
				$($id => $desc,)*
				_ => "Unknown error",
			}
		}
	};
}

errnos!(
	(EPERM, 1, "Operation not permitted"),
	(ENOENT, 2, "No such file or directory"),
	(ESRCH, 3, "No such process"),
	(EINTR, 4, "Interrupted system call"),
	(EIO, 5, "I/O error"),
	(ENXIO, 6, "No such device or address"),
	(E2BIG, 7, "Argument list too long"),
	(ENOEXEC, 8, "Exec format error"),
	(EBADF, 9, "Bad file number"),
	(ECHILD, 10, "No child processes"),
	(EAGAIN, 11, "Try again"),
	(ENOMEM, 12, "Out of memory"),
	(EACCES, 13, "Permission denied"),
	(EFAULT, 14, "Bad address"),
	(ENOTBLK, 15, "Block device required"),
	(EBUSY, 16, "Device or resource busy"),
	(EEXIST, 17, "File exists"),
	(EXDEV, 18, "Cross-device link"),
	(ENODEV, 19, "No such device"),
	(ENOTDIR, 20, "Not a directory"),
	(EISDIR, 21, "Is a directory"),
	(EINVAL, 22, "Invalid argument"),
	(ENFILE, 23, "File table overflow"),
	(EMFILE, 24, "Too many open files"),
	(ENOTTY, 25, "Not a typewriter"),
	(ETXTBSY, 26, "Text file busy"),
	(EFBIG, 27, "File too large"),
	(ENOSPC, 28, "No space left on device"),
	(ESPIPE, 29, "Illegal seek"),
	(EROFS, 30, "Read-only file system"),
	(EMLINK, 31, "Too many links"),
	(EPIPE, 32, "Broken pipe"),
	(EDOM, 33, "Math argument out of domain of func"),
	(ERANGE, 34, "Math result not representable"),
	(EDEADLK, 35, "Resource deadlock would occur"),
	(ENAMETOOLONG, 36, "File name too long"),
	(ENOLCK, 37, "No record locks available"),
	(ENOSYS, 38, "Invalid system call number"),
	(ENOTEMPTY, 39, "Directory not empty"),
	(ELOOP, 40, "Too many symbolic links encountered"),
	(EIDRM, 43, "Identifier removed"),
	(EOVERFLOW, 75, "Value too large for defined data type"),
	(EILSEQ, 84, "Illegal byte sequence"),
	(ENOTSOCK, 88, "Socket operation on non-socket"),
	(EOPNOTSUPP, 95, "Operation not supported on transport endpoint"),
	(ETIMEDOUT, 110, "Connection timed out"),
	(ENOMEDIUM, 123, "No medium found"),
	(EMEDIUMTYPE, 124, "Wrong medium type")
);

/// A kernel error, holding the errno to be reported to userspace.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Errno(i32);

impl Errno {
	/// Creates a new instance from the given errno number.
	pub const fn new(errno: i32) -> Self {
		Self(errno)
	}

	/// Returns the errno number.
	pub const fn as_int(self) -> i32 {
		self.0
	}
}

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Self(ENOMEM)
	}
}

impl From<Errno> for i32 {
	fn from(e: Errno) -> i32 {
		e.0
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(fmt, "{} (errno {})", strerror(self.0), self.0)
	}
}

impl fmt::Debug for Errno {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, fmt)
	}
}

/// Builds an [`Errno`] from its name.
#[macro_export]
macro_rules! errno {
	($name:ident) => {
		$crate::errno::Errno::new($crate::errno::$name)
	};
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn errno_conversion() {
		let e: Errno = AllocError.into();
		assert_eq!(e, crate::errno!(ENOMEM));
		assert_eq!(e.as_int(), 12);
	}
}
