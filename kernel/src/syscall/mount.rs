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

//! The `mount` system call mounts a filesystem.

use crate::{
	device::DeviceID,
	file::{mountpoint, vfs, S_IFBLK},
	memory::user::UserString,
	process::Process,
};
use utils::{collections::path::Path, errno, errno::EResult};

/// Mounts the filesystem of type `fstype` from `source` onto `target`.
///
/// Mounting requires superuser privileges.
pub fn mount(
	source: UserString,
	target: UserString,
	fstype: UserString,
	flags: u32,
	data: usize,
) -> EResult<usize> {
	let proc = Process::current();
	if !proc.credentials().is_privileged() {
		return Err(errno!(EPERM));
	}
	let source = source.copy_from_user()?;
	let target = target.copy_from_user()?;
	let fstype = fstype.copy_from_user()?;
	// Resolve the source to a device
	let src_node = vfs::node_from_path(Path::new(&*source)?)?;
	let dev = match src_node.dev_id {
		Some(dev) if src_node.file_type() == S_IFBLK => dev,
		// Virtual filesystems are keyed by a pseudo device
		_ => DeviceID {
			major: 0,
			minor: src_node.inode as u32,
		},
	};
	// Mount options
	let opts = if data != 0 {
		crate::memory::user::UserString::from_user(data).copy_from_user()?
	} else {
		utils::collections::string::String::new()
	};
	let opt_flags = mountpoint::parse_options(&opts);
	mountpoint::mount(
		dev,
		Path::new(&*target)?,
		(!fstype.is_empty()).then_some(&*fstype),
		flags | opt_flags,
		&opts,
	)?;
	Ok(0)
}
