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

//! The `write` system call writes to a file descriptor.

use crate::{memory::user::UserSlice, process::Process};
use utils::{errno, errno::EResult};

/// Writes up to `count` bytes from `buf` to the descriptor `fd`.
pub fn write(fd: u32, buf: usize, count: usize) -> EResult<usize> {
	let proc = Process::current();
	let fds = proc.fd_table().ok_or_else(|| errno!(EBADF))?;
	let file = fds.lock().get(fd)?.file.clone();
	let kbuf = UserSlice::from_user(buf, count).copy_from_user()?;
	let n = file.write(&kbuf)?;
	Ok(n)
}
