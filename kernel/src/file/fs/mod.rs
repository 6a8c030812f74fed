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

//! Filesystem types and instances.

pub mod tmpfs;

use crate::{device::DeviceID, file::Node, sync::mutex::Mutex};
use core::fmt;
use utils::{
	collections::vec::Vec,
	errno,
	errno::EResult,
	ptr::arc::Arc,
};

/// A filesystem type, able to load instances from a device.
pub trait FilesystemType: Send + Sync {
	/// Returns the name of the filesystem type.
	fn name(&self) -> &'static [u8];

	/// Reads the superblock from the device `dev` and returns the loaded filesystem instance.
	///
	/// `sector_size` is the logical sector size of the device.
	fn read_super(&self, dev: DeviceID, sector_size: u32) -> EResult<Arc<dyn Filesystem>>;
}

/// A loaded filesystem instance.
pub trait Filesystem: fmt::Debug + Send + Sync {
	/// Returns the name of the filesystem type the instance belongs to.
	fn type_name(&self) -> &'static [u8];

	/// Returns the root node of the filesystem.
	///
	/// The node is pinned in the node table.
	fn root(&self) -> EResult<Arc<Node>>;

	/// Writes the superblock back to the device.
	fn write_super(&self) -> EResult<()> {
		Ok(())
	}

	/// Releases the superblock. Called last, on unmount.
	fn put_super(&self) {}
}

/// The registered filesystem types.
static TYPES: Mutex<Vec<Arc<dyn FilesystemType>>> = Mutex::new(Vec::new());

/// Registers a new filesystem type.
pub fn register<T: 'static + FilesystemType>(fs_type: T) -> EResult<()> {
	let mut types = TYPES.lock();
	if types.iter().any(|t| t.name() == fs_type.name()) {
		return Err(errno!(EEXIST));
	}
	types.push(Arc::new(fs_type)?)?;
	Ok(())
}

/// Returns the filesystem type with the given name.
pub fn get_type(name: &[u8]) -> Option<Arc<dyn FilesystemType>> {
	TYPES.lock().iter().find(|t| t.name() == name).cloned()
}

/// Detects the filesystem type present on the device `dev`.
///
/// If no registered type recognizes the device's content, the function returns
/// [`errno::ENODEV`].
pub fn detect(_dev: DeviceID) -> EResult<Arc<dyn FilesystemType>> {
	// On-disk filesystems register their own magic probes. None of the built-in filesystems
	// lives on a device
	Err(errno!(ENODEV))
}

/// Registers the built-in filesystem types.
pub(crate) fn init() -> EResult<()> {
	register(tmpfs::TmpFsType)
}
