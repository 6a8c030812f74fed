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

//! The `open` system call opens a file.

use crate::{
	file::{vfs, S_IFREG},
	memory::user::UserString,
	process::Process,
};
use utils::{collections::path::Path, errno, errno::EResult};

/// Open flag: create the file if it does not exist.
const O_CREAT: i32 = 0o100;

/// Opens the file at the given path and returns a new file descriptor.
pub fn open(pathname: UserString, flags: i32, mode: u32) -> EResult<usize> {
	let path = pathname.copy_from_user()?;
	let path = Path::new(&*path)?;
	let node = match vfs::node_from_path(path) {
		Ok(node) => node,
		Err(e) if e == errno!(ENOENT) && flags & O_CREAT != 0 => {
			vfs::create_from_path(path, S_IFREG | (mode & 0o777))?
		}
		Err(e) => return Err(e),
	};
	let proc = Process::current();
	let fds = proc.fd_table().ok_or_else(|| errno!(EBADF))?;
	let id = fds.lock().open(node, flags as u32)?;
	Ok(id as usize)
}
