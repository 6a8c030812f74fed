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

//! The loopback device exposes a regular file as a block device.
//!
//! Each unit moves between the following states:
//!
//! ```text
//! UNBOUND --SET_FD/CONFIGURE--> BOUND
//! BOUND   --CLR_FD, no opener--> RUNDOWN --> UNBOUND
//! BOUND   --CLR_FD, openers----> BOUND (autoclear set, rundown at last close)
//! DELETING: transient while the unit is removed, rejects opens
//! ```

use crate::{
	device,
	device::{
		storage::partition,
		storage::partition::{Partition, SectorSource},
		BlkReq, DeviceID, DeviceOps, MAJOR_LOOP, MAJOR_LOOP_PARTITION,
	},
	file,
	file::{mountpoint, Node, S_IFBLK, S_IFREG},
	memory::cache,
	sync::mutex::Mutex,
};
use macros::AnyRepr;
use utils::{
	collections::vec::Vec,
	errno,
	errno::EResult,
	limits::PAGE_SIZE,
	ptr::arc::Arc,
	slice_copy,
};

/// The number of loopback units.
pub const LOOP_MAX: u32 = 8;
/// The stride of partition minors: partition `p` of unit `i` has minor `i * STRIDE + p`.
const PART_MINOR_STRIDE: u32 = 16;

/// ioctl: bind a backing file descriptor.
pub const LOOP_SET_FD: u32 = 0x4c00;
/// ioctl: unbind the backing file.
pub const LOOP_CLR_FD: u32 = 0x4c01;
/// ioctl: set offset, size limit, flags and name.
pub const LOOP_SET_STATUS: u32 = 0x4c02;
/// ioctl: get offset, size limit, flags and name.
pub const LOOP_GET_STATUS: u32 = 0x4c03;
/// ioctl: 64-bit variant of [`LOOP_SET_STATUS`].
pub const LOOP_SET_STATUS64: u32 = 0x4c04;
/// ioctl: 64-bit variant of [`LOOP_GET_STATUS`].
pub const LOOP_GET_STATUS64: u32 = 0x4c05;
/// ioctl: swap the backing file of a read-only bound unit.
pub const LOOP_CHANGE_FD: u32 = 0x4c06;
/// ioctl: re-derive the size limit from the backing file.
pub const LOOP_SET_CAPACITY: u32 = 0x4c07;
/// ioctl: toggle direct I/O on the backing file.
pub const LOOP_SET_DIRECT_IO: u32 = 0x4c08;
/// ioctl: set the logical block size.
pub const LOOP_SET_BLOCK_SIZE: u32 = 0x4c09;
/// ioctl: combined bind and status set.
pub const LOOP_CONFIGURE: u32 = 0x4c0a;
/// ioctl: force a re-read of the partition table.
pub const BLKRRPART: u32 = 0x125f;

/// Status flag: the unit is read-only.
pub const LO_FLAGS_READ_ONLY: u32 = 1;
/// Status flag: the unit is unbound when its last opener closes it.
pub const LO_FLAGS_AUTOCLEAR: u32 = 4;
/// Status flag: scan the partition table when binding.
pub const LO_FLAGS_PARTSCAN: u32 = 8;
/// Status flag: I/O bypasses the page cache of the backing file.
pub const LO_FLAGS_DIRECT_IO: u32 = 16;

/// Status flags settable through [`LOOP_SET_STATUS`].
const SETTABLE_FLAGS: u32 = LO_FLAGS_AUTOCLEAR | LO_FLAGS_PARTSCAN;
/// Status flags clearable through [`LOOP_SET_STATUS`].
const CLEARABLE_FLAGS: u32 = LO_FLAGS_AUTOCLEAR;

/// The status of a loopback unit, exchanged with userspace.
#[repr(C)]
#[derive(AnyRepr, Clone)]
pub struct LoopInfo64 {
	/// The device ID of the unit.
	pub lo_device: u64,
	/// The inode number of the backing file.
	pub lo_inode: u64,
	/// The unit number.
	pub lo_number: u32,
	/// Status flags.
	pub lo_flags: u32,
	/// The offset in the backing file, in bytes.
	pub lo_offset: u64,
	/// The maximum number of usable bytes. Zero means the whole file.
	pub lo_sizelimit: u64,
	/// The path of the backing file.
	pub lo_file_name: [u8; 64],
}

/// The configuration of a unit, for [`LOOP_CONFIGURE`].
#[repr(C)]
#[derive(AnyRepr, Clone)]
pub struct LoopConfig {
	/// The file descriptor of the backing file.
	pub fd: u32,
	/// The logical block size in bytes. Zero keeps the default.
	pub block_size: u32,
	/// The status of the unit.
	pub info: LoopInfo64,
}

/// The state of a loopback unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
	/// No backing file.
	Unbound,
	/// A backing file is attached.
	Bound,
	/// The unit is being torn down.
	Rundown,
	/// The unit is being removed: opens are rejected.
	Deleting,
}

/// A loopback unit.
#[derive(Debug)]
struct LoopDevice {
	/// The unit number.
	index: u32,
	/// The state of the unit.
	state: State,
	/// The backing file. `Some` if and only if the state is `Bound`.
	file: Option<Arc<Node>>,
	/// The offset in the backing file, in bytes.
	offset: u64,
	/// The maximum number of usable bytes. Zero means the whole file.
	sizelimit: u64,
	/// The logical block size.
	block_size: u32,
	/// Status flags.
	flags: u32,
	/// The number of openers of the unit and its partitions.
	openers: u32,
	/// The scanned partitions.
	partitions: Vec<Partition>,
	/// The path of the backing file, as given by userspace.
	file_name: [u8; 64],
}

impl LoopDevice {
	const fn new(index: u32) -> Self {
		Self {
			index,
			state: State::Unbound,
			file: None,
			offset: 0,
			sizelimit: 0,
			block_size: 512,
			flags: 0,
			openers: 0,
			partitions: Vec::new(),
			file_name: [0; 64],
		}
	}

	/// Returns the number of usable bytes of the unit.
	fn usable_size(&self) -> u64 {
		let Some(file) = &self.file else {
			return 0;
		};
		let avail = file.size().saturating_sub(self.offset);
		if self.sizelimit != 0 {
			u64::min(avail, self.sizelimit)
		} else {
			avail
		}
	}

	/// Binds the backing file `file`.
	fn bind(&mut self, file: Arc<Node>) -> EResult<()> {
		if self.state != State::Unbound {
			return Err(errno!(EBUSY));
		}
		// Only regular files and block devices can back a unit
		if !matches!(file.file_type(), S_IFREG | S_IFBLK) {
			return Err(errno!(EINVAL));
		}
		self.file = Some(file);
		self.state = State::Bound;
		Ok(())
	}

	/// Tears the unit down, flushing and dropping the cached pages of its device.
	fn rundown(&mut self) {
		self.state = State::Rundown;
		cache::remove_disk_pages(DeviceID {
			major: MAJOR_LOOP,
			minor: self.index,
		});
		self.file = None;
		self.offset = 0;
		self.sizelimit = 0;
		self.flags = 0;
		self.partitions.clear();
		self.file_name.fill(0);
		self.state = State::Unbound;
	}

	/// Returns the status of the unit.
	fn status(&self) -> LoopInfo64 {
		LoopInfo64 {
			lo_device: ((MAJOR_LOOP as u64) << 32) | self.index as u64,
			lo_inode: self.file.as_ref().map(|f| f.inode).unwrap_or(0),
			lo_number: self.index,
			lo_flags: self.flags,
			lo_offset: self.offset,
			lo_sizelimit: self.sizelimit,
			lo_file_name: self.file_name,
		}
	}

	/// Updates the status of the unit from `info`.
	fn set_status(&mut self, info: &LoopInfo64) -> EResult<()> {
		if self.state != State::Bound {
			return Err(errno!(ENXIO));
		}
		self.offset = info.lo_offset;
		self.sizelimit = info.lo_sizelimit;
		let set = info.lo_flags & SETTABLE_FLAGS;
		let cleared = !info.lo_flags & CLEARABLE_FLAGS;
		self.flags = (self.flags | set) & !cleared;
		self.file_name = info.lo_file_name;
		if self.flags & LO_FLAGS_PARTSCAN != 0 {
			self.scan_partitions()?;
		}
		Ok(())
	}

	/// Scans the partition table of the unit.
	fn scan_partitions(&mut self) -> EResult<()> {
		let src = LoopSectors(self);
		let partitions = partition::scan(&src)?;
		self.partitions = partitions;
		Ok(())
	}

	/// The partition the minor `minor` refers to, or `None` for the whole unit.
	fn part_bounds(&self, minor: u32) -> EResult<Option<&Partition>> {
		if minor / PART_MINOR_STRIDE != self.index {
			return Err(errno!(ENODEV));
		}
		let pnum = minor % PART_MINOR_STRIDE;
		if pnum == 0 {
			return Ok(None);
		}
		self.partitions
			.get(pnum as usize - 1)
			.map(Some)
			.ok_or_else(|| errno!(ENODEV))
	}

	/// Reads or writes `len` bytes at byte offset `off` of the unit's usable range.
	fn transfer(&self, off: u64, buf: &mut [u8], len: usize, write: bool) -> EResult<usize> {
		if write && self.flags & LO_FLAGS_READ_ONLY != 0 {
			return Err(errno!(EROFS));
		}
		let Some(file) = &self.file else {
			return Err(errno!(ENXIO));
		};
		if off + len as u64 > self.usable_size() {
			return Err(errno!(EINVAL));
		}
		let file_off = self.offset + off;
		let mut done = 0;
		while done < len {
			let cur = file_off + done as u64;
			let page_off = cur / PAGE_SIZE as u64;
			let inner = (cur % PAGE_SIZE as u64) as usize;
			let chunk = usize::min(len - done, PAGE_SIZE - inner);
			let page = cache::get_cached_page(file, page_off, true)?
				.ok_or_else(|| errno!(EIO))?;
			if write {
				unsafe {
					slice_copy(&buf[done..done + chunk], &mut page.slice_mut()[inner..]);
				}
				page.mark_dirty();
			} else {
				slice_copy(&page.slice()[inner..inner + chunk], &mut buf[done..done + chunk]);
			}
			done += chunk;
		}
		Ok(done)
	}
}

/// [`SectorSource`] view of a bound unit, for the partition scan.
struct LoopSectors<'d>(&'d LoopDevice);

impl SectorSource for LoopSectors<'_> {
	fn read_sector(&self, lba: u64, buf: &mut [u8]) -> EResult<()> {
		let block_size = self.0.block_size as u64;
		self.0
			.transfer(lba * block_size, buf, block_size as usize, false)?;
		Ok(())
	}

	fn sector_size(&self) -> u32 {
		self.0.block_size
	}

	fn sectors_count(&self) -> u64 {
		self.0.usable_size() / self.0.block_size as u64
	}
}

/// The loopback units.
static DEVICES: [Mutex<LoopDevice>; LOOP_MAX as usize] = [
	Mutex::new(LoopDevice::new(0)),
	Mutex::new(LoopDevice::new(1)),
	Mutex::new(LoopDevice::new(2)),
	Mutex::new(LoopDevice::new(3)),
	Mutex::new(LoopDevice::new(4)),
	Mutex::new(LoopDevice::new(5)),
	Mutex::new(LoopDevice::new(6)),
	Mutex::new(LoopDevice::new(7)),
];

/// Returns the unit with the given index.
fn unit(index: u32) -> EResult<&'static Mutex<LoopDevice>> {
	DEVICES.get(index as usize).ok_or_else(|| errno!(ENODEV))
}

/// Binds the file `file` to the unit `index`.
pub fn set_fd(index: u32, file: Arc<Node>) -> EResult<()> {
	unit(index)?.lock().bind(file)
}

/// Configures the unit `index` in one call: bind, status and block size.
pub fn configure(index: u32, file: Arc<Node>, config: &LoopConfig) -> EResult<()> {
	let mut dev = unit(index)?.lock();
	dev.bind(file)?;
	if config.block_size != 0 {
		if config.block_size as usize > PAGE_SIZE
			|| !config.block_size.is_power_of_two()
		{
			dev.rundown();
			return Err(errno!(EINVAL));
		}
		dev.block_size = config.block_size;
	}
	let res = dev.set_status(&config.info);
	if res.is_err() {
		dev.rundown();
	}
	res
}

/// Swaps the backing file of the unit `index`.
///
/// The unit must be bound read-only, and the new file must have the same size and type as the
/// current one.
pub fn change_fd(index: u32, file: Arc<Node>) -> EResult<()> {
	let mut dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	if dev.flags & LO_FLAGS_READ_ONLY == 0 {
		return Err(errno!(EINVAL));
	}
	let cur = dev.file.as_ref().unwrap();
	if file.file_type() != cur.file_type() || file.size() != cur.size() {
		return Err(errno!(EINVAL));
	}
	dev.file = Some(file);
	Ok(())
}

/// Unbinds the unit `index`.
///
/// If the unit still has openers, the autoclear flag is set instead and the teardown happens at
/// the last close.
pub fn clr_fd(index: u32) -> EResult<()> {
	let mut dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	dev.flags |= LO_FLAGS_AUTOCLEAR;
	if dev.openers == 0 {
		dev.rundown();
	}
	Ok(())
}

/// Sets the status of the unit `index`.
pub fn set_status(index: u32, info: &LoopInfo64) -> EResult<()> {
	unit(index)?.lock().set_status(info)
}

/// Returns the status of the unit `index`.
pub fn get_status(index: u32) -> EResult<LoopInfo64> {
	let dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	Ok(dev.status())
}

/// Re-derives the size limit of the unit `index` from its backing file.
pub fn set_capacity(index: u32) -> EResult<()> {
	let mut dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	dev.sizelimit = 0;
	Ok(())
}

/// Toggles direct I/O on the unit `index`. The backing file is synchronized on toggle.
pub fn set_direct_io(index: u32, enabled: bool) -> EResult<()> {
	let mut dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	// The cache and the direct path must not see different content
	cache::sync_node(dev.file.as_ref().unwrap())?;
	if enabled {
		dev.flags |= LO_FLAGS_DIRECT_IO;
	} else {
		dev.flags &= !LO_FLAGS_DIRECT_IO;
	}
	Ok(())
}

/// Sets the logical block size of the unit `index`.
pub fn set_block_size(index: u32, size: u32) -> EResult<()> {
	if size as usize > PAGE_SIZE || !size.is_power_of_two() || size < 512 {
		return Err(errno!(EINVAL));
	}
	let mut dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	cache::sync_node(dev.file.as_ref().unwrap())?;
	dev.block_size = size;
	Ok(())
}

/// Forces a re-read of the partition table of the unit `index`.
///
/// The operation fails with [`errno::EBUSY`] if the whole disk or one of its partitions is
/// mounted.
pub fn reread_partitions(index: u32) -> EResult<()> {
	let mut dev = unit(index)?.lock();
	if dev.state != State::Bound {
		return Err(errno!(ENXIO));
	}
	let whole = DeviceID {
		major: MAJOR_LOOP,
		minor: index,
	};
	if mountpoint::is_mounted(whole) {
		return Err(errno!(EBUSY));
	}
	for p in 0..dev.partitions.len() as u32 {
		let part = DeviceID {
			major: MAJOR_LOOP_PARTITION,
			minor: index * PART_MINOR_STRIDE + p + 1,
		};
		if mountpoint::is_mounted(part) {
			return Err(errno!(EBUSY));
		}
	}
	dev.scan_partitions()
}

/// Returns the scanned partitions of the unit `index`.
pub fn partitions(index: u32) -> EResult<Vec<Partition>> {
	let dev = unit(index)?.lock();
	let mut parts = Vec::with_capacity(dev.partitions.len())?;
	for p in dev.partitions.iter() {
		parts.push(p.clone())?;
	}
	Ok(parts)
}

/// The loopback driver, registered for both the whole-disk and the partition majors.
#[derive(Debug)]
struct LoopOps {
	/// Tells whether the instance serves partition minors.
	partitions: bool,
}

impl LoopOps {
	fn index_of(&self, minor: u32) -> u32 {
		if self.partitions {
			minor / PART_MINOR_STRIDE
		} else {
			minor
		}
	}
}

impl DeviceOps for LoopOps {
	fn open(&self, minor: u32) -> EResult<()> {
		let mut dev = unit(self.index_of(minor))?.lock();
		// A unit being removed rejects opens
		if dev.state == State::Deleting {
			return Err(errno!(ENXIO));
		}
		dev.openers += 1;
		Ok(())
	}

	fn close(&self, minor: u32) -> EResult<()> {
		let mut dev = unit(self.index_of(minor))?.lock();
		dev.openers = dev.openers.saturating_sub(1);
		if dev.openers == 0 && dev.state == State::Bound && dev.flags & LO_FLAGS_AUTOCLEAR != 0
		{
			dev.rundown();
		}
		Ok(())
	}

	fn strategy(&self, req: &mut BlkReq) -> EResult<usize> {
		let dev = unit(self.index_of(req.dev.minor))?.lock();
		if dev.state != State::Bound {
			return Err(errno!(ENXIO));
		}
		if req.bytes % dev.block_size as usize != 0 {
			return Err(errno!(EINVAL));
		}
		// Partition minors add the partition start to the offset and clamp to its extent
		let part = if self.partitions {
			dev.part_bounds(req.dev.minor)?
		} else {
			None
		};
		let mut off = req.blockno * req.fs_blocksz as u64;
		if let Some(part) = part {
			let part_off = part.lba * dev.block_size as u64;
			let part_len = part.total_sectors * dev.block_size as u64;
			if off + req.bytes as u64 > part_len {
				return Err(errno!(EINVAL));
			}
			off += part_off;
		}
		let bytes = req.bytes;
		dev.transfer(off, req.buf, bytes, req.write)
	}

	fn ioctl(&self, minor: u32, cmd: u32, arg: usize) -> EResult<usize> {
		let index = self.index_of(minor);
		match cmd {
			LOOP_CLR_FD => clr_fd(index)?,
			LOOP_SET_CAPACITY => set_capacity(index)?,
			LOOP_SET_DIRECT_IO => set_direct_io(index, arg != 0)?,
			LOOP_SET_BLOCK_SIZE => set_block_size(index, arg as u32)?,
			BLKRRPART => reread_partitions(index)?,
			// Commands taking a userspace structure or file descriptor are decoded by the
			// ioctl system call
			_ => return Err(errno!(EINVAL)),
		}
		Ok(0)
	}

	fn sector_size(&self, minor: u32) -> u32 {
		unit(self.index_of(minor))
			.map(|d| d.lock().block_size)
			.unwrap_or(512)
	}

	fn capacity(&self, minor: u32) -> EResult<u64> {
		let dev = unit(self.index_of(minor))?.lock();
		if self.partitions {
			if let Some(part) = dev.part_bounds(minor)? {
				return Ok(part.total_sectors);
			}
		}
		Ok(dev.usable_size() / dev.block_size as u64)
	}
}

/// Registers the loopback driver.
pub(crate) fn init() -> EResult<()> {
	device::register(
		MAJOR_LOOP,
		Arc::new(LoopOps {
			partitions: false,
		})?,
	)?;
	device::register(
		MAJOR_LOOP_PARTITION,
		Arc::new(LoopOps {
			partitions: true,
		})?,
	)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file;

	/// Creates a backing file of `pages` pages, with the given bytes at the beginning.
	fn backing(pages: usize, head: &[u8]) -> Arc<Node> {
		let node = file::test_node();
		let zero = [0u8; PAGE_SIZE];
		for i in 0..pages {
			node.write_page_raw(i as u64, &zero).unwrap();
		}
		let mut first = [0u8; PAGE_SIZE];
		first[..head.len()].copy_from_slice(head);
		node.write_page_raw(0, &first).unwrap();
		node.set_size((pages * PAGE_SIZE) as u64);
		node
	}

	#[test_case]
	fn loop_bind_mbr_scan() {
		// A 10 MiB image with one MBR partition: lba 1, 0x3fff sectors
		let mut head = [0u8; 512];
		head[0x1be..0x1ce].copy_from_slice(&[
			0x80, 0x01, 0x01, 0x00, 0x83, 0xfe, 0xff, 0xff, 0x01, 0x00, 0x00, 0x00, 0xff,
			0x3f, 0x00, 0x00,
		]);
		head[510] = 0x55;
		head[511] = 0xaa;
		let node = backing(10 * 1024 * 1024 / PAGE_SIZE, &head);
		let config = LoopConfig {
			fd: 0,
			block_size: 0,
			info: LoopInfo64 {
				lo_device: 0,
				lo_inode: 0,
				lo_number: 6,
				lo_flags: LO_FLAGS_PARTSCAN,
				lo_offset: 0,
				lo_sizelimit: 0,
				lo_file_name: [0; 64],
			},
		};
		configure(6, node, &config).unwrap();
		let parts = partitions(6).unwrap();
		assert_eq!(parts.len(), 1);
		assert_eq!(parts[0].lba, 1);
		assert_eq!(parts[0].total_sectors, 0x3fff);
		clr_fd(6).unwrap();
		assert!(get_status(6).is_err());
	}

	#[test_case]
	fn loop_write_read_roundtrip() {
		let node = backing(4, &[]);
		set_fd(5, node).unwrap();
		let ops = LoopOps {
			partitions: false,
		};
		let dev = DeviceID {
			major: MAJOR_LOOP,
			minor: 5,
		};
		// Write at an unaligned file position (block 3 of 512 bytes)
		let mut data = [0u8; 512];
		data.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
		let mut req = BlkReq {
			dev,
			blockno: 3,
			fs_blocksz: 512,
			buf: &mut data,
			bytes: 512,
			write: true,
		};
		assert_eq!(ops.strategy(&mut req).unwrap(), 512);
		let mut read = [0u8; 512];
		let mut req = BlkReq {
			dev,
			blockno: 3,
			fs_blocksz: 512,
			buf: &mut read,
			bytes: 512,
			write: false,
		};
		assert_eq!(ops.strategy(&mut req).unwrap(), 512);
		assert!(read.iter().enumerate().all(|(i, b)| *b == i as u8));
		clr_fd(5).unwrap();
	}

	#[test_case]
	fn loop_bounds_and_states() {
		let node = backing(2, &[]);
		set_fd(4, node.clone()).unwrap();
		// Double bind fails
		assert_eq!(set_fd(4, node), Err(errno!(EBUSY)));
		let ops = LoopOps {
			partitions: false,
		};
		let dev = DeviceID {
			major: MAJOR_LOOP,
			minor: 4,
		};
		// Out of bounds
		let mut buf = [0u8; 512];
		let mut req = BlkReq {
			dev,
			blockno: 2 * (PAGE_SIZE as u64) / 512,
			fs_blocksz: 512,
			buf: &mut buf,
			bytes: 512,
			write: false,
		};
		assert_eq!(ops.strategy(&mut req), Err(errno!(EINVAL)));
		// Read-only unit rejects writes
		set_status(
			4,
			&LoopInfo64 {
				lo_device: 0,
				lo_inode: 0,
				lo_number: 4,
				lo_flags: 0,
				lo_offset: 0,
				lo_sizelimit: 0,
				lo_file_name: [0; 64],
			},
		)
		.unwrap();
		{
			let mut d = unit(4).unwrap().lock();
			d.flags |= LO_FLAGS_READ_ONLY;
		}
		let mut req = BlkReq {
			dev,
			blockno: 0,
			fs_blocksz: 512,
			buf: &mut buf,
			bytes: 512,
			write: true,
		};
		assert_eq!(ops.strategy(&mut req), Err(errno!(EROFS)));
		// Autoclear with an opener: teardown happens at last close
		ops.open(4).unwrap();
		clr_fd(4).unwrap();
		assert!(get_status(4).is_ok());
		ops.close(4).unwrap();
		assert!(get_status(4).is_err());
	}
}
