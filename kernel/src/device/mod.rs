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

//! Device management.
//!
//! Each device major number is bound to a vtable of operations. `strategy` is the single I/O
//! primitive of block devices: a driver either completes the request synchronously or blocks
//! the caller until completion. Requests to the same device observe issue order.

pub mod storage;

use crate::sync::mutex::Mutex;
use core::fmt;
use utils::{
	collections::vec::Vec,
	errno,
	errno::EResult,
	ptr::arc::Arc,
};

/// Major number of memory character devices (`/dev/null`, `/dev/zero`, ...).
pub const MAJOR_MEM: u32 = 1;
/// Major number of the primary ATA bus.
pub const MAJOR_ATA_PRIMARY: u32 = 3;
/// Major number of loopback devices.
pub const MAJOR_LOOP: u32 = 7;
/// Major number of the input core.
pub const MAJOR_INPUT: u32 = 13;
/// Major number of audio devices.
pub const MAJOR_AUDIO: u32 = 14;
/// Major number of the secondary ATA bus.
pub const MAJOR_ATA_SECONDARY: u32 = 22;
/// Major number of loopback partitions.
pub const MAJOR_LOOP_PARTITION: u32 = 259;

/// A device identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DeviceID {
	/// The device major number, selecting the driver.
	pub major: u32,
	/// The device minor number, selecting the unit.
	pub minor: u32,
}

/// A block I/O request.
///
/// `bytes` must be a multiple of the device's sector size and `buf` must be a kernel buffer of
/// at least `bytes` bytes.
#[derive(Debug)]
pub struct BlkReq<'b> {
	/// The target device.
	pub dev: DeviceID,
	/// The block number, in units of `fs_blocksz`.
	pub blockno: u64,
	/// The size of a filesystem block, in bytes.
	pub fs_blocksz: u32,
	/// The I/O buffer.
	pub buf: &'b mut [u8],
	/// The number of bytes to transfer.
	pub bytes: usize,
	/// `true` for a write, `false` for a read.
	pub write: bool,
}

/// Operations of a device driver, registered per major number.
pub trait DeviceOps: fmt::Debug + Send + Sync {
	/// Opens the unit `minor`.
	fn open(&self, minor: u32) -> EResult<()>;

	/// Closes the unit `minor`.
	fn close(&self, minor: u32) -> EResult<()>;

	/// Performs the I/O request `req`.
	///
	/// The function returns the number of bytes transferred.
	fn strategy(&self, req: &mut BlkReq) -> EResult<usize>;

	/// Performs the ioctl `cmd` on the unit `minor`.
	///
	/// The ioctl surface of each driver is a closed set: unknown commands fail with
	/// [`errno::EINVAL`].
	fn ioctl(&self, _minor: u32, _cmd: u32, _arg: usize) -> EResult<usize> {
		Err(errno!(EINVAL))
	}

	/// Returns the sector size of the unit `minor`, in bytes.
	fn sector_size(&self, _minor: u32) -> u32 {
		512
	}

	/// Returns the capacity of the unit `minor`, in sectors.
	fn capacity(&self, minor: u32) -> EResult<u64>;
}

/// The device drivers, by major number.
static DRIVERS: Mutex<Vec<(u32, Arc<dyn DeviceOps>)>> = Mutex::new(Vec::new());

/// Registers the driver for the given major number.
pub fn register(major: u32, ops: Arc<dyn DeviceOps>) -> EResult<()> {
	let mut drivers = DRIVERS.lock();
	if drivers.iter().any(|(m, _)| *m == major) {
		return Err(errno!(EEXIST));
	}
	drivers.push((major, ops))?;
	Ok(())
}

/// Returns the driver for the given major number.
pub fn get(major: u32) -> Option<Arc<dyn DeviceOps>> {
	DRIVERS
		.lock()
		.iter()
		.find(|(m, _)| *m == major)
		.map(|(_, ops)| ops.clone())
}

/// Returns the sector size of the device `dev`, in bytes.
///
/// If no driver is registered for the device, the function returns 512.
pub fn sector_size(dev: DeviceID) -> u32 {
	get(dev.major)
		.map(|ops| ops.sector_size(dev.minor))
		.unwrap_or(512)
}

/// Performs the I/O request `req` through the driver of its target device.
pub fn strategy(req: &mut BlkReq) -> EResult<usize> {
	let ops = get(req.dev.major).ok_or_else(|| errno!(ENODEV))?;
	ops.strategy(req)
}

/// Node operations of a block device special file: pages go through the device's strategy.
#[derive(Debug)]
struct BlkNodeOps {
	/// The represented device.
	dev: DeviceID,
}

impl BlkNodeOps {
	fn transfer(&self, off: u64, buf: &mut [u8], write: bool) -> EResult<()> {
		let sector_size = sector_size(self.dev);
		let bytes = buf.len();
		debug_assert_eq!(bytes % sector_size as usize, 0);
		let mut req = BlkReq {
			dev: self.dev,
			blockno: off * (utils::limits::PAGE_SIZE as u64 / sector_size as u64),
			fs_blocksz: sector_size,
			buf,
			bytes,
			write,
		};
		strategy(&mut req)?;
		Ok(())
	}
}

impl crate::file::NodeOps for BlkNodeOps {
	fn lookup(
		&self,
		_node: &Arc<crate::file::Node>,
		_name: &[u8],
	) -> EResult<Option<Arc<crate::file::Node>>> {
		Err(errno!(ENOTDIR))
	}

	fn read_page(&self, _node: &crate::file::Node, off: u64, buf: &mut [u8]) -> EResult<()> {
		self.transfer(off, buf, false)
	}

	fn write_page(&self, _node: &crate::file::Node, off: u64, buf: &[u8]) -> EResult<()> {
		// The strategy buffer is read from, despite being passed mutably
		let mut tmp = utils::collections::vec::Vec::new();
		tmp.extend_from_slice(buf)?;
		self.transfer(off, &mut tmp, true)
	}

	fn sync_node(&self, _node: &crate::file::Node) -> EResult<()> {
		Ok(())
	}
}

/// Creates a detached block device node for the device `dev`.
///
/// The node's size reflects the device's capacity; its pages go through the device's
/// strategy.
pub fn create_device_node(
	dev: DeviceID,
	fs_dev: DeviceID,
	inode: crate::file::INode,
) -> EResult<crate::file::Node> {
	let ops = get(dev.major).ok_or_else(|| errno!(ENODEV))?;
	let size = ops.capacity(dev.minor)? * ops.sector_size(dev.minor) as u64;
	let mut node = crate::file::Node::new(
		fs_dev,
		inode,
		crate::file::Stat {
			mode: crate::file::S_IFBLK | 0o600,
			nlink: 1,
			uid: 0,
			gid: 0,
		},
		size,
		utils::boxed::Box::new(BlkNodeOps {
			dev,
		})? as utils::boxed::Box<dyn crate::file::NodeOps>,
	);
	node.dev_id = Some(dev);
	Ok(node)
}

/// Initializes device management, registering the built-in drivers.
pub(crate) fn init() -> EResult<()> {
	storage::loopback::init()
}
