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

//! Memory regions.

use crate::{file::Node, memory::VirtAddr};
use utils::{errno::AllocResult, limits::PAGE_SIZE, ptr::arc::Arc, TryClone};

/// The type of a memory region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionType {
	/// Executable code.
	Text,
	/// Data.
	Data,
	/// A stack.
	Stack,
	/// Shared memory.
	Shmem,
}

/// A contiguous region of virtual memory with uniform protection, type and backing.
#[derive(Debug)]
pub struct MemRegion {
	/// The address of the beginning of the region. Page-aligned.
	pub addr: VirtAddr,
	/// The size of the region in pages. Never zero.
	pub pages: usize,
	/// The memory protection.
	pub prot: u8,
	/// The type of the region.
	pub kind: RegionType,
	/// Mapping flags.
	pub flags: u32,

	/// The backing file, if any.
	pub node: Option<Arc<Node>>,
	/// The offset of the mapping in the backing file, in bytes. Page-aligned.
	pub file_off: u64,
	/// The number of meaningful bytes in the backing file.
	pub file_len: u64,
}

impl MemRegion {
	/// Returns the address of the first byte after the region.
	#[inline]
	pub fn end(&self) -> VirtAddr {
		self.addr + self.pages * PAGE_SIZE
	}

	/// Returns a copy of the region covering the `pages` pages starting at `addr`, with its
	/// file backing rebased.
	fn sub(&self, addr: VirtAddr, pages: usize, prot: u8) -> Self {
		let off = (addr.0 - self.addr.0) as u64;
		Self {
			addr,
			pages,
			prot,
			kind: self.kind,
			flags: self.flags,
			node: self.node.clone(),
			file_off: self.file_off + off,
			file_len: self.file_len.saturating_sub(off),
		}
	}

	/// Splits the region around the removed range `[rm_addr, rm_addr + rm_pages * PAGE_SIZE)`.
	///
	/// The function returns the remaining parts before and after the removed range, if any.
	pub fn split(self, rm_addr: VirtAddr, rm_pages: usize) -> (Option<Self>, Option<Self>) {
		let prev_pages = (rm_addr.0 - self.addr.0) / PAGE_SIZE;
		let next_addr = rm_addr + rm_pages * PAGE_SIZE;
		let next_pages = (self.end().0 - next_addr.0) / PAGE_SIZE;
		let prev = (prev_pages > 0).then(|| self.sub(self.addr, prev_pages, self.prot));
		let next = (next_pages > 0).then(|| self.sub(next_addr, next_pages, self.prot));
		(prev, next)
	}

	/// Splits the region for a protection change on `[ch_addr, ch_addr + ch_pages)`.
	///
	/// The function returns the part before the change, the changed part, and the part after.
	pub fn split_for_prot(
		self,
		ch_addr: VirtAddr,
		ch_pages: usize,
		prot: u8,
	) -> (Option<Self>, Self, Option<Self>) {
		let prev_pages = (ch_addr.0 - self.addr.0) / PAGE_SIZE;
		let next_addr = ch_addr + ch_pages * PAGE_SIZE;
		let next_pages = (self.end().0 - next_addr.0) / PAGE_SIZE;
		let prev = (prev_pages > 0).then(|| self.sub(self.addr, prev_pages, self.prot));
		let next = (next_pages > 0).then(|| self.sub(next_addr, next_pages, self.prot));
		let mid = self.sub(ch_addr, ch_pages, prot);
		(prev, mid, next)
	}

	/// Tells whether `other` can be merged at the end of `self`: adjacent, identical
	/// attributes and contiguous file backing.
	pub fn can_merge_with(&self, other: &Self) -> bool {
		if self.end() != other.addr
			|| self.prot != other.prot
			|| self.kind != other.kind
			|| self.flags != other.flags
		{
			return false;
		}
		match (&self.node, &other.node) {
			(None, None) => true,
			(Some(a), Some(b)) => {
				Arc::ptr_eq(a, b)
					&& self.file_off + (self.pages * PAGE_SIZE) as u64 == other.file_off
			}
			_ => false,
		}
	}
}

impl TryClone for MemRegion {
	fn try_clone(&self) -> AllocResult<Self> {
		Ok(Self {
			addr: self.addr,
			pages: self.pages,
			prot: self.prot,
			kind: self.kind,
			flags: self.flags,
			node: self.node.clone(),
			file_off: self.file_off,
			file_len: self.file_len,
		})
	}
}
