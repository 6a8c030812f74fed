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

//! A temporary filesystem, living entirely in memory.
//!
//! File content is backed by pages of the tmpfs arena. The filesystem is also used as the root
//! when no root device is usable, and by self-tests.

use crate::{
	device::DeviceID,
	file,
	file::{
		fs::{Filesystem, FilesystemType},
		INode, Mode, Node, NodeOps, Stat, S_IFDIR, S_IFMT, S_IFREG,
	},
	memory::{arena, arena::Arena, VirtAddr},
	sync::mutex::Mutex,
};
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};
use utils::{
	boxed::Box,
	collections::{string::String, vec::Vec},
	errno,
	errno::EResult,
	limits::PAGE_SIZE,
	ptr::arc::Arc,
	slice_copy,
};

/// The next inode number, shared by every tmpfs instance.
static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

/// A directory entry of a tmpfs directory.
#[derive(Debug)]
struct Entry {
	name: String,
	inode: INode,
}

/// Node operations for a tmpfs node.
///
/// The node's content pages live in the tmpfs arena and are freed with the node.
#[derive(Debug, Default)]
struct TmpFsNode {
	/// Content pages, for regular files. `None` for holes.
	pages: Mutex<Vec<Option<VirtAddr>>>,
	/// Directory entries, for directories.
	entries: Mutex<Vec<Entry>>,
}

impl Drop for TmpFsNode {
	fn drop(&mut self) {
		let pages = self.pages.lock();
		for page in pages.iter().flatten() {
			unsafe {
				arena::free_mapped_page(Arena::Tmpfs, *page);
			}
		}
	}
}

impl NodeOps for TmpFsNode {
	fn lookup(&self, node: &Arc<Node>, name: &[u8]) -> EResult<Option<Arc<Node>>> {
		if node.file_type() != S_IFDIR {
			return Err(errno!(ENOTDIR));
		}
		let entries = self.entries.lock();
		let Some(ent) = entries.iter().find(|e| e.name == *name) else {
			return Ok(None);
		};
		Ok(file::get_node(node.dev, ent.inode))
	}

	fn read_page(&self, _node: &Node, off: u64, buf: &mut [u8]) -> EResult<()> {
		let pages = self.pages.lock();
		match pages.get(off as usize).copied().flatten() {
			Some(page) => {
				let src = unsafe {
					core::slice::from_raw_parts(page.as_ptr::<u8>(), PAGE_SIZE)
				};
				slice_copy(src, buf);
			}
			None => buf.fill(0),
		}
		Ok(())
	}

	fn write_page(&self, node: &Node, off: u64, buf: &[u8]) -> EResult<()> {
		let mut pages = self.pages.lock();
		let off = off as usize;
		if pages.len() <= off {
			pages.resize(off + 1, None)?;
		}
		let page = match pages[off] {
			Some(page) => page,
			None => {
				let (_, virt) =
					arena::alloc_mapped_page(Arena::Tmpfs, arena::default_flags(Arena::Tmpfs))?;
				pages[off] = Some(virt);
				virt
			}
		};
		let dst = unsafe { core::slice::from_raw_parts_mut(page.as_ptr::<u8>(), PAGE_SIZE) };
		slice_copy(buf, dst);
		let end = (off * PAGE_SIZE + buf.len()) as u64;
		if end > node.size() {
			node.set_size(end);
		}
		Ok(())
	}

	fn sync_node(&self, _node: &Node) -> EResult<()> {
		// Memory is the backing storage
		Ok(())
	}

	fn create(&self, node: &Arc<Node>, name: &[u8], mode: Mode) -> EResult<Arc<Node>> {
		if node.file_type() != S_IFDIR {
			return Err(errno!(ENOTDIR));
		}
		let mut entries = self.entries.lock();
		if entries.iter().any(|e| e.name == *name) {
			return Err(errno!(EEXIST));
		}
		let inode = NEXT_INODE.fetch_add(1, Relaxed);
		let new = file::insert_node(new_node(node.dev, inode, mode)?)?;
		entries.push(Entry {
			name: String::try_from(name)?,
			inode,
		})?;
		Ok(new)
	}

	fn truncate(&self, node: &Node, size: u64) -> EResult<()> {
		let mut pages = self.pages.lock();
		let keep = (size as usize).div_ceil(PAGE_SIZE);
		while pages.len() > keep {
			if let Some(Some(page)) = pages.pop() {
				unsafe {
					arena::free_mapped_page(Arena::Tmpfs, page);
				}
			}
		}
		node.set_size(size);
		Ok(())
	}
}

/// Creates a detached tmpfs node.
pub(crate) fn new_node(dev: DeviceID, inode: INode, mode: Mode) -> EResult<Node> {
	debug_assert!(matches!(mode & S_IFMT, S_IFREG | S_IFDIR));
	Ok(Node::new(
		dev,
		inode,
		Stat {
			mode,
			nlink: 1,
			uid: 0,
			gid: 0,
		},
		0,
		Box::new(TmpFsNode::default())? as Box<dyn NodeOps>,
	))
}

/// A tmpfs instance.
#[derive(Debug)]
pub struct TmpFs {
	/// The device ID the instance is mounted from.
	dev: DeviceID,
	/// The root inode number.
	root: INode,
}

impl Filesystem for TmpFs {
	fn type_name(&self) -> &'static [u8] {
		b"tmpfs"
	}

	fn root(&self) -> EResult<Arc<Node>> {
		file::get_node(self.dev, self.root).ok_or_else(|| errno!(ENOENT))
	}
}

/// The tmpfs filesystem type.
pub struct TmpFsType;

impl FilesystemType for TmpFsType {
	fn name(&self) -> &'static [u8] {
		b"tmpfs"
	}

	fn read_super(&self, dev: DeviceID, _sector_size: u32) -> EResult<Arc<dyn Filesystem>> {
		let inode = NEXT_INODE.fetch_add(1, Relaxed);
		file::insert_node(new_node(dev, inode, S_IFDIR | 0o755)?)?;
		Ok(Arc::new(TmpFs {
			dev,
			root: inode,
		})? as Arc<dyn Filesystem>)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn tmpfs_create_lookup() {
		let fs = TmpFsType
			.read_super(
				DeviceID {
					major: 0,
					minor: 200,
				},
				512,
			)
			.unwrap();
		let root = fs.root().unwrap();
		let file = root.ops.create(&root, b"hello", S_IFREG | 0o644).unwrap();
		let found = root.ops.lookup(&root, b"hello").unwrap().unwrap();
		assert!(Arc::ptr_eq(&file, &found));
		assert!(root.ops.lookup(&root, b"other").unwrap().is_none());
	}

	#[test_case]
	fn tmpfs_page_roundtrip() {
		let fs = TmpFsType
			.read_super(
				DeviceID {
					major: 0,
					minor: 201,
				},
				512,
			)
			.unwrap();
		let root = fs.root().unwrap();
		let file = root.ops.create(&root, b"data", S_IFREG | 0o644).unwrap();
		let mut buf = [0u8; PAGE_SIZE];
		buf[0] = 0x42;
		buf[PAGE_SIZE - 1] = 0x99;
		file.ops.write_page(&file, 2, &buf).unwrap();
		let mut read = [0u8; PAGE_SIZE];
		file.ops.read_page(&file, 2, &mut read).unwrap();
		assert_eq!(buf, read);
		// Holes read as zeros
		file.ops.read_page(&file, 1, &mut read).unwrap();
		assert!(read.iter().all(|b| *b == 0));
		assert_eq!(file.size(), 3 * PAGE_SIZE as u64);
	}
}
