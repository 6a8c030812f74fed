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

//! Information handed over by the bootloader.
//!
//! The bootloader is expected to enter the kernel with paging enabled and the whole physical
//! memory mapped at the beginning of the higher half, so that early allocations can be reached
//! through the direct mapping.

use crate::{device::DeviceID, memory::PhysAddr, sync::once::OnceInit};

/// A memory map entry type: usable RAM.
pub const MEMORY_AVAILABLE: u32 = 1;
/// A memory map entry type: reserved, must not be touched.
pub const MEMORY_RESERVED: u32 = 2;

/// An entry of the physical memory map.
#[derive(Clone, Copy, Debug)]
pub struct MemMapEntry {
	/// The beginning of the memory region.
	pub addr: PhysAddr,
	/// The size of the region in bytes.
	pub len: u64,
	/// The type of the region.
	pub type_: u32,
}

/// Information provided by the bootloader, translated from its own structures early at boot.
pub struct BootInfo {
	/// The physical memory map.
	pub memmap: &'static [MemMapEntry],
	/// The device to mount as the root filesystem.
	pub root_dev: DeviceID,
	/// The path to the init binary, if specified on the command line.
	pub init_path: Option<&'static [u8]>,
	/// Tells whether the kernel logger is silenced.
	pub silent: bool,
	/// The startup time, in seconds since the Unix epoch, read from the RTC.
	pub startup_time: u64,
}

/// The boot information, kept for the whole kernel lifetime.
static INFO: OnceInit<&'static BootInfo> = unsafe { OnceInit::new() };

/// Makes the boot information globally accessible.
pub(crate) fn init(info: &'static BootInfo) {
	unsafe {
		OnceInit::init(&INFO, info);
	}
}

/// Returns the boot information.
pub fn info() -> &'static BootInfo {
	INFO.get()
}
