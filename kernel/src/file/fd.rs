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

//! File descriptor tables.

use crate::{
	device::DeviceID,
	file::{Node, S_IFREG},
	memory::cache,
	process,
	sync::mutex::Mutex,
};
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};
use utils::{
	collections::vec::Vec,
	errno,
	errno::EResult,
	limits::{OPEN_MAX, PAGE_SIZE},
	ptr::arc::Arc,
	slice_copy,
};

/// File descriptor flag: the descriptor is closed on `execve`.
pub const FD_CLOEXEC: u32 = 1;

/// An open file description, shared between the descriptors that duplicate it.
#[derive(Debug)]
pub struct OpenFile {
	/// The open node.
	pub node: Arc<Node>,
	/// The current file offset.
	pub off: AtomicU64,
	/// Open flags.
	pub flags: u32,
}

impl OpenFile {
	/// Reads from the file at the current offset, through the page cache.
	///
	/// The function returns the number of bytes read.
	pub fn read(&self, buf: &mut [u8]) -> EResult<usize> {
		let off = self.off.load(Relaxed);
		let size = self.node.size();
		if off >= size {
			return Ok(0);
		}
		let len = usize::min(buf.len(), (size - off) as usize);
		let mut done = 0;
		while done < len {
			let cur = off + done as u64;
			let page_off = cur / PAGE_SIZE as u64;
			let inner = (cur % PAGE_SIZE as u64) as usize;
			let page = cache::get_cached_page(&self.node, page_off, true)?
				.ok_or_else(|| errno!(EIO))?;
			let chunk = usize::min(len - done, PAGE_SIZE - inner);
			slice_copy(&page.slice()[inner..inner + chunk], &mut buf[done..done + chunk]);
			done += chunk;
		}
		self.off.fetch_add(done as u64, Relaxed);
		Ok(done)
	}

	/// Writes to the file at the current offset, through the page cache.
	///
	/// The function returns the number of bytes written.
	pub fn write(&self, buf: &[u8]) -> EResult<usize> {
		let off = self.off.load(Relaxed);
		let mut done = 0;
		while done < buf.len() {
			let cur = off + done as u64;
			let page_off = cur / PAGE_SIZE as u64;
			let inner = (cur % PAGE_SIZE as u64) as usize;
			let page = cache::get_cached_page(&self.node, page_off, true)?
				.ok_or_else(|| errno!(EIO))?;
			let chunk = usize::min(buf.len() - done, PAGE_SIZE - inner);
			unsafe {
				slice_copy(&buf[done..done + chunk], &mut page.slice_mut()[inner..]);
			}
			page.mark_dirty();
			done += chunk;
		}
		let end = off + done as u64;
		if self.node.file_type() == S_IFREG && end > self.node.size() {
			self.node.set_size(end);
		}
		self.off.fetch_add(done as u64, Relaxed);
		Ok(done)
	}
}

/// A file descriptor: an open file, plus per-descriptor flags.
#[derive(Clone, Debug)]
pub struct FileDescriptor {
	/// The open file description.
	pub file: Arc<OpenFile>,
	/// Descriptor flags ([`FD_CLOEXEC`]).
	pub flags: u32,
}

/// A table of file descriptors.
#[derive(Debug, Default)]
pub struct FdTable(Vec<Option<FileDescriptor>>);

impl FdTable {
	/// Opens `node` and binds it to the lowest free descriptor number, which is returned.
	pub fn open(&mut self, node: Arc<Node>, flags: u32) -> EResult<u32> {
		let file = Arc::new(OpenFile {
			node,
			off: AtomicU64::new(0),
			flags,
		})?;
		self.push(FileDescriptor {
			file,
			flags: 0,
		})
	}

	/// Binds the given descriptor to the lowest free number, which is returned.
	pub fn push(&mut self, fd: FileDescriptor) -> EResult<u32> {
		let free = self.0.iter().position(|e| e.is_none());
		match free {
			Some(i) => {
				self.0[i] = Some(fd);
				Ok(i as u32)
			}
			None => {
				if self.0.len() >= OPEN_MAX {
					return Err(errno!(EMFILE));
				}
				self.0.push(Some(fd))?;
				Ok((self.0.len() - 1) as u32)
			}
		}
	}

	/// Returns the descriptor with the given number.
	pub fn get(&self, id: u32) -> EResult<&FileDescriptor> {
		self.0
			.get(id as usize)
			.and_then(Option::as_ref)
			.ok_or_else(|| errno!(EBADF))
	}

	/// Closes the descriptor with the given number.
	pub fn close(&mut self, id: u32) -> EResult<()> {
		let fd = self
			.0
			.get_mut(id as usize)
			.and_then(Option::take)
			.ok_or_else(|| errno!(EBADF))?;
		drop(fd);
		Ok(())
	}

	/// Duplicates the table, bumping the reference count of each open file.
	pub fn duplicate(&self) -> EResult<Self> {
		let mut fds = Vec::with_capacity(self.0.len())?;
		for fd in self.0.iter() {
			fds.push(fd.clone())?;
		}
		Ok(Self(fds))
	}

	/// Closes every descriptor marked close-on-exec and clears the mask on the others.
	pub fn close_on_exec(&mut self) {
		for slot in self.0.iter_mut() {
			match slot {
				Some(fd) if fd.flags & FD_CLOEXEC != 0 => *slot = None,
				Some(fd) => fd.flags = 0,
				None => {}
			}
		}
	}

	/// Closes every descriptor whose node lives on the device `dev`.
	pub fn close_device(&mut self, dev: DeviceID) {
		for slot in self.0.iter_mut() {
			if matches!(slot, Some(fd) if fd.file.node.dev == dev) {
				*slot = None;
			}
		}
	}

	/// Tells whether the table holds a descriptor on the device `dev`.
	pub fn has_device(&self, dev: DeviceID) -> bool {
		self.0
			.iter()
			.flatten()
			.any(|fd| fd.file.node.dev == dev)
	}
}

/// Closes, in every process, the descriptors whose node lives on the device `dev`.
///
/// Used by forced unmount: subsequent operations on those descriptors fail with `EBADF`.
pub fn close_device_fds(dev: DeviceID) {
	process::for_each(|proc| {
		if let Some(fds) = proc.fd_table() {
			fds.lock().close_device(dev);
		}
	});
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file;

	#[test_case]
	fn fd_open_close() {
		let mut table = FdTable::default();
		let a = table.open(file::test_node(), 0).unwrap();
		let b = table.open(file::test_node(), 0).unwrap();
		assert_eq!((a, b), (0, 1));
		table.close(a).unwrap();
		assert!(table.get(a).is_err());
		// The slot is reused
		let c = table.open(file::test_node(), 0).unwrap();
		assert_eq!(c, 0);
		assert!(table.close(42).is_err());
	}

	#[test_case]
	fn fd_cloexec_sweep() {
		let mut table = FdTable::default();
		let a = table.open(file::test_node(), 0).unwrap();
		let b = table.open(file::test_node(), 0).unwrap();
		table.0[a as usize].as_mut().unwrap().flags = FD_CLOEXEC;
		table.close_on_exec();
		assert!(table.get(a).is_err());
		assert!(table.get(b).is_ok());
	}

	#[test_case]
	fn fd_file_read_write() {
		let mut table = FdTable::default();
		let id = table.open(file::test_node(), 0).unwrap();
		let file = table.get(id).unwrap().file.clone();
		file.write(b"hello world").unwrap();
		assert_eq!(file.node.size(), 11);
		file.off.store(6, Relaxed);
		let mut buf = [0u8; 16];
		let n = file.read(&mut buf).unwrap();
		assert_eq!(&buf[..n], b"world");
	}
}
