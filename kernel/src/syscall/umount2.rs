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

//! The `umount2` system call unmounts a filesystem.

use crate::{
	device::DeviceID,
	file::{mountpoint, vfs, S_IFBLK},
	memory::user::UserString,
	process::Process,
};
use utils::{collections::path::Path, errno, errno::EResult};

/// Unmounts the filesystem mounted from `target`.
///
/// Unmounting requires superuser privileges. With `MNT_FORCE`, open files on the filesystem
/// are closed from under their holders.
pub fn umount2(target: UserString, flags: u32) -> EResult<usize> {
	let proc = Process::current();
	if !proc.credentials().is_privileged() {
		return Err(errno!(EPERM));
	}
	let target = target.copy_from_user()?;
	let node = vfs::node_from_path(Path::new(&*target)?)?;
	// Accept either the source device or the mounted root
	let dev = match node.dev_id {
		Some(dev) if node.file_type() == S_IFBLK => dev,
		_ => node.dev,
	};
	mountpoint::umount(dev, flags)?;
	Ok(0)
}
