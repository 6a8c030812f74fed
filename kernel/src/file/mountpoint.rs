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

//! Mount points.
//!
//! The mount table is a small fixed array with at most one entry per device. A mount point
//! node carries the `MOUNTPOINT` flag and points to the root of the mounted filesystem; path
//! resolution follows that pointer.

use crate::{
	device::DeviceID,
	file,
	file::{fs, fs::Filesystem, vfs, Node, S_IFDIR},
	memory::cache,
	println,
	sync::mutex::Mutex,
};
use utils::{
	collections::{path::Path, string::String},
	errno,
	errno::EResult,
	ptr::arc::Arc,
};

/// Mount flag: mount the filesystem read-only.
pub const MS_RDONLY: u32 = 1;
/// Mount flag: ignore set-user-ID and set-group-ID bits.
pub const MS_NOSUID: u32 = 2;
/// Mount flag: do not allow access to device special files.
pub const MS_NODEV: u32 = 4;
/// Mount flag: do not allow programs to be executed.
pub const MS_NOEXEC: u32 = 8;
/// Mount flag: writes are synchronous.
pub const MS_SYNCHRONOUS: u32 = 16;
/// Mount flag: remount an existing mount, updating flags and options only.
pub const MS_REMOUNT: u32 = 32;
/// Mount flag: permit mandatory locking.
pub const MS_MANDLOCK: u32 = 64;
/// Mount flag: do not update access times.
pub const MS_NOATIME: u32 = 1024;
/// Mount flag: do not update directory access times.
pub const MS_NODIRATIME: u32 = 2048;

/// Unmount flag: force the unmount even if the filesystem is busy.
pub const MNT_FORCE: u32 = 1;

/// The maximum number of mounted filesystems.
pub const MOUNT_MAX: usize = 16;

/// A mounted filesystem.
#[derive(Debug)]
pub struct MountInfo {
	/// The device the filesystem is mounted from. Unique in the table.
	pub dev: DeviceID,
	/// The node the filesystem is mounted on. `None` for the root filesystem.
	pub mpoint: Option<Arc<Node>>,
	/// The root node of the mounted filesystem.
	pub root: Arc<Node>,
	/// The filesystem instance, holding the superblock.
	pub fs: Arc<dyn Filesystem>,
	/// Mount flags.
	pub flags: u32,
	/// The mount options string, as given to the mount call.
	pub opts: String,
}

/// The mount table.
static MOUNT_TABLE: Mutex<[Option<MountInfo>; MOUNT_MAX]> =
	Mutex::new([const { None }; MOUNT_MAX]);

/// Parses a comma-separated mount options string into mount flags.
///
/// Unknown options are ignored, as they may be filesystem-specific.
pub fn parse_options(opts: &[u8]) -> u32 {
	let mut flags = 0;
	for opt in opts.split(|b| *b == b',') {
		match opt {
			b"defaults" | b"async" | b"rw" | b"suid" | b"dev" | b"exec" | b"atime"
			| b"diratime" | b"nomand" => {}
			b"ro" => flags |= MS_RDONLY,
			b"nosuid" => flags |= MS_NOSUID,
			b"nodev" => flags |= MS_NODEV,
			b"noexec" => flags |= MS_NOEXEC,
			b"sync" => flags |= MS_SYNCHRONOUS,
			b"remount" => flags |= MS_REMOUNT,
			b"mand" => flags |= MS_MANDLOCK,
			b"noatime" => flags |= MS_NOATIME,
			b"nodiratime" => flags |= MS_NODIRATIME,
			_ => {}
		}
	}
	flags
}

/// Returns the mount flags of the filesystem holding the device `dev`.
///
/// If the device is not mounted, the function returns `None`.
pub fn get_flags(dev: DeviceID) -> Option<u32> {
	let table = MOUNT_TABLE.lock();
	table
		.iter()
		.flatten()
		.find(|info| info.dev == dev)
		.map(|info| info.flags)
}

/// Tells whether the device `dev` is mounted.
pub fn is_mounted(dev: DeviceID) -> bool {
	get_flags(dev).is_some()
}

/// Mounts the filesystem of the device `dev` on the directory at `path`.
///
/// Arguments:
/// - `fstype` is the name of the filesystem type. If `None`, the type is detected from the
///   device content.
/// - `flags` are the mount flags.
/// - `opts` is the mount options string, kept in the mount table.
///
/// The caller is responsible for the permission check (mounting requires privileges).
pub fn mount(
	dev: DeviceID,
	path: &Path,
	fstype: Option<&[u8]>,
	flags: u32,
	opts: &[u8],
) -> EResult<()> {
	// Locate the mount point
	let mpoint = vfs::node_from_path(path)?;
	if mpoint.file_type() != S_IFDIR {
		return Err(errno!(ENOTDIR));
	}
	let mut table = MOUNT_TABLE.lock();
	// A device may be mounted only once
	let existing = table
		.iter_mut()
		.flatten()
		.find(|info| info.dev == dev);
	if let Some(info) = existing {
		if flags & MS_REMOUNT == 0 {
			return Err(errno!(EBUSY));
		}
		// Remount: only flags and options are updated
		info.flags = flags & !MS_REMOUNT;
		info.opts = String::try_from(opts)?;
		return Ok(());
	}
	// The mount point must not already hold a filesystem
	if mpoint.is_mountpoint() {
		return Err(errno!(EBUSY));
	}
	let slot = table
		.iter_mut()
		.position(|info| info.is_none())
		.ok_or_else(|| errno!(ENOMEM))?;
	// Select the filesystem type and read the superblock
	let fs_type = match fstype {
		Some(name) => fs::get_type(name).ok_or_else(|| errno!(ENODEV))?,
		None => fs::detect(dev)?,
	};
	let fs = fs_type.read_super(dev, crate::device::sector_size(dev))?;
	let root = fs.root()?;
	mpoint.set_mountpoint(root.clone());
	table[slot] = Some(MountInfo {
		dev,
		mpoint: Some(mpoint),
		root,
		fs,
		flags: flags & !MS_REMOUNT,
		opts: String::try_from(opts)?,
	});
	Ok(())
}

/// Unmounts the filesystem of the device `dev`.
///
/// If files are still open on the filesystem, the function fails with [`errno::EBUSY`], unless
/// `flags` contains [`MNT_FORCE`], in which case they are closed from under their holders.
pub fn umount(dev: DeviceID, flags: u32) -> EResult<()> {
	let mut table = MOUNT_TABLE.lock();
	let slot = table
		.iter()
		.position(|info| matches!(info, Some(info) if info.dev == dev))
		.ok_or_else(|| errno!(EINVAL))?;
	let force = flags & MNT_FORCE != 0;
	{
		let info = table[slot].as_ref().unwrap();
		// Pinned nodes other than the filesystem root mean open files
		if !force && file::has_pinned_nodes(dev, Some(&info.root)) {
			return Err(errno!(EBUSY));
		}
	}
	let info = table[slot].take().unwrap();
	drop(table);
	if force {
		// Closes files from under their holders
		file::fd::close_device_fds(dev);
	}
	// Break references that would keep the nodes alive
	vfs::invalidate_dev_dentries(dev);
	if let Err(errno) = file::sync_nodes(dev) {
		println!("unmount of {dev:?}: inode writeback failure: {errno}");
	}
	// Cache invalidation happens-before the superblock is freed
	cache::remove_disk_pages(dev);
	if let Err(errno) = info.fs.write_super() {
		println!("unmount of {dev:?}: superblock writeback failure: {errno}");
	}
	info.fs.put_super();
	if let Some(mpoint) = &info.mpoint {
		mpoint.clear_mountpoint();
	}
	file::evict_nodes(dev, true);
	Ok(())
}

/// Mounts the root filesystem from the device `dev`.
///
/// If the device does not hold a usable filesystem, a tmpfs is mounted instead so that the
/// system can come up.
pub(crate) fn mount_root(dev: DeviceID) -> EResult<()> {
	let fs_type = match fs::detect(dev) {
		Ok(t) => t,
		Err(_) => {
			println!("no usable filesystem on root device, falling back to tmpfs");
			fs::get_type(b"tmpfs").unwrap()
		}
	};
	let fs = fs_type.read_super(dev, crate::device::sector_size(dev))?;
	let root = fs.root()?;
	let mut table = MOUNT_TABLE.lock();
	table[0] = Some(MountInfo {
		dev,
		mpoint: None,
		root,
		fs,
		flags: 0,
		opts: String::new(),
	});
	Ok(())
}

/// Returns the root node of the root filesystem.
pub fn root_node() -> EResult<Arc<Node>> {
	let table = MOUNT_TABLE.lock();
	let info = table[0].as_ref().ok_or_else(|| errno!(ENOENT))?;
	Ok(info.root.clone())
}

/// Calls `f` on every mounted filesystem.
pub fn for_each<F: FnMut(&MountInfo)>(mut f: F) {
	let table = MOUNT_TABLE.lock();
	for info in table.iter().flatten() {
		f(info);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn mount_opts_parse() {
		assert_eq!(parse_options(b"defaults"), 0);
		assert_eq!(parse_options(b"ro,noexec"), MS_RDONLY | MS_NOEXEC);
		assert_eq!(
			parse_options(b"nosuid,nodev,sync"),
			MS_NOSUID | MS_NODEV | MS_SYNCHRONOUS
		);
		// Unknown options are ignored
		assert_eq!(parse_options(b"rw,whatever=1"), 0);
		assert_eq!(parse_options(b"remount,ro"), MS_REMOUNT | MS_RDONLY);
	}
}
