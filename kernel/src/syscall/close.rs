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

//! The `close` system call closes a file descriptor.

use crate::process::Process;
use utils::{errno, errno::EResult};

/// Closes the given file descriptor.
pub fn close(fd: u32) -> EResult<usize> {
	let proc = Process::current();
	let fds = proc.fd_table().ok_or_else(|| errno!(EBADF))?;
	fds.lock().close(fd)?;
	Ok(0)
}
