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

//! The page cache avoids unnecessary disk I/O by keeping the content of node pages in memory.
//!
//! A cached page is pinned as long as a [`CachedPage`] handle to it exists outside the cache
//! itself. Pinned pages cannot be reclaimed. Reclaim evicts the oldest unpinned pages first,
//! writing dirty content back through the node operations beforehand.

use crate::{
	file::Node,
	memory::{arena, arena::Arena, PhysAddr, VirtAddr},
	println,
	sync::mutex::Mutex,
	time,
};
use core::{
	slice,
	sync::atomic::{
		AtomicBool, AtomicU64,
		Ordering::{Acquire, Relaxed, Release},
	},
};
use utils::{
	errno::EResult,
	limits::PAGE_SIZE,
	ptr::arc::Arc,
};

/// The content of one page of a node, resident in memory.
#[derive(Debug)]
pub struct CachedPageInner {
	/// The node the page belongs to.
	node: Arc<Node>,
	/// The offset of the page in the node, in pages.
	off: u64,
	/// The kernel mapping of the page, in the page-cache arena.
	virt: VirtAddr,
	/// The physical frame backing the page.
	phys: PhysAddr,
	/// Timestamp of the last access, in milliseconds of uptime.
	last_use: AtomicU64,
	/// Tells whether the page content is newer than the on-disk content.
	dirty: AtomicBool,
}

impl Drop for CachedPageInner {
	fn drop(&mut self) {
		unsafe {
			arena::free_mapped_page(Arena::Pcache, self.virt);
		}
	}
}

/// A pinned handle on a cached page.
///
/// The page stays in memory as long as a handle exists: dropping the handle releases the pin.
#[derive(Clone, Debug)]
pub struct CachedPage(Arc<CachedPageInner>);

impl CachedPage {
	/// Returns the offset of the page in its node, in pages.
	#[inline]
	pub fn offset(&self) -> u64 {
		self.0.off
	}

	/// Returns the physical address of the page.
	#[inline]
	pub fn phys_addr(&self) -> PhysAddr {
		self.0.phys
	}

	/// Returns the kernel virtual address of the page.
	#[inline]
	pub fn virt_addr(&self) -> VirtAddr {
		self.0.virt
	}

	/// Returns an immutable slice over the page's content.
	pub fn slice(&self) -> &[u8] {
		unsafe { slice::from_raw_parts(self.0.virt.as_ptr(), PAGE_SIZE) }
	}

	/// Returns a mutable slice over the page's content.
	///
	/// # Safety
	///
	/// The caller must ensure no other reference to the content exists at the same time.
	#[allow(clippy::mut_from_ref)]
	pub unsafe fn slice_mut(&self) -> &mut [u8] {
		slice::from_raw_parts_mut(self.0.virt.as_ptr(), PAGE_SIZE)
	}

	/// Marks the page as dirty. It will be written back before eviction.
	pub fn mark_dirty(&self) {
		self.0.dirty.store(true, Release);
	}

	/// Tells whether handles exist outside the cache.
	fn is_pinned(&self) -> bool {
		Arc::strong_count(&self.0) > 1
	}

	/// Writes the page back to the node if dirty.
	pub fn writeback(&self) -> EResult<()> {
		if !self.0.dirty.swap(false, Acquire) {
			return Ok(());
		}
		let res = self.0.node.write_page_raw(self.0.off, self.slice());
		if res.is_err() {
			// Keep the content marked dirty for a future attempt
			self.0.dirty.store(true, Release);
		}
		res
	}
}

/// The set of cached pages of one node.
///
/// Pages are kept sorted by their offset in the node.
#[derive(Debug, Default)]
pub struct PageCache {
	pages: Mutex<utils::collections::vec::Vec<CachedPage>>,
}

impl PageCache {
	/// Creates an empty cache.
	pub const fn new() -> Self {
		Self {
			pages: Mutex::new(utils::collections::vec::Vec::new()),
		}
	}
}

/// Returns the page at offset `off` (in pages) of `node`.
///
/// On a cache miss, if `create` is set, the page is read through the node's operations and
/// inserted; otherwise the function returns `None`.
///
/// The returned handle pins the page.
pub fn get_cached_page(node: &Arc<Node>, off: u64, create: bool) -> EResult<Option<CachedPage>> {
	let mut pages = node.cache.pages.lock();
	let res = pages.binary_search_by(|p| p.offset().cmp(&off));
	let now = time::uptime_ms();
	match res {
		Ok(i) => {
			let page = pages[i].clone();
			page.0.last_use.store(now, Release);
			Ok(Some(page))
		}
		Err(_) if !create => Ok(None),
		Err(i) => {
			// Cache miss: allocate, read from the filesystem and insert
			let (phys, virt) = arena::alloc_mapped_page(
				Arena::Pcache,
				arena::default_flags(Arena::Pcache),
			)?;
			let page = CachedPage(Arc::new(CachedPageInner {
				node: node.clone(),
				off,
				virt,
				phys,
				last_use: AtomicU64::new(now),
				dirty: AtomicBool::new(false),
			})?);
			let buf = unsafe { page.slice_mut() };
			node.read_page_raw(off, buf)?;
			pages.insert(i, page.clone())?;
			Ok(Some(page))
		}
	}
}

/// Writes back every dirty page of `node`.
pub fn sync_node(node: &Node) -> EResult<()> {
	let pages = node.cache.pages.lock();
	for page in pages.iter() {
		page.writeback()?;
	}
	Ok(())
}

/// Removes from the cache every page belonging to a node on the device `dev`.
///
/// Dirty pages are written back first. This is used on unmount and on loopback detach:
/// invalidation happens-before the superblock is freed.
pub fn remove_disk_pages(dev: crate::device::DeviceID) {
	crate::file::for_each_node(|node| {
		if node.dev != dev {
			return;
		}
		let mut pages = node.cache.pages.lock();
		for page in pages.iter() {
			if let Err(errno) = page.writeback() {
				println!("page cache writeback failure on {dev:?}: {errno}");
			}
		}
		pages.clear();
	});
}

/// Evicts unpinned pages whose last access is older than `max_age` milliseconds.
pub fn remove_old_pages(max_age: u64) {
	reclaim(usize::MAX, Some(max_age));
}

/// Evicts up to `goal` unpinned pages, oldest first.
///
/// If `min_age` is set, only pages older than that many milliseconds are considered.
///
/// The function returns the number of pages evicted.
pub fn reclaim(goal: usize, min_age: Option<u64>) -> usize {
	let now = time::uptime_ms();
	let mut evicted = 0;
	crate::file::for_each_node(|node| {
		if evicted >= goal {
			return;
		}
		let mut pages = node.cache.pages.lock();
		pages.retain(|page| {
			if evicted >= goal || page.is_pinned() {
				return true;
			}
			let age = now.saturating_sub(page.0.last_use.load(Acquire));
			if let Some(min_age) = min_age {
				if age < min_age {
					return true;
				}
			}
			if let Err(errno) = page.writeback() {
				println!("page cache writeback failure: {errno}");
				return true;
			}
			evicted += 1;
			false
		});
	});
	evicted
}

/// Returns the number of resident pages for the given node.
pub fn resident_count(node: &Node) -> usize {
	node.cache.pages.lock().len()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file;

	#[test_case]
	fn cache_pin_and_reclaim() {
		let node = file::test_node();
		let page = get_cached_page(&node, 0, true).unwrap().unwrap();
		assert_eq!(resident_count(&node), 1);
		// Pinned: reclaim must not evict it
		reclaim(usize::MAX, None);
		assert_eq!(resident_count(&node), 1);
		drop(page);
		reclaim(usize::MAX, None);
		assert_eq!(resident_count(&node), 0);
	}

	#[test_case]
	fn cache_hit_same_page(){
		let node = file::test_node();
		let a = get_cached_page(&node, 3, true).unwrap().unwrap();
		let b = get_cached_page(&node, 3, true).unwrap().unwrap();
		assert_eq!(a.phys_addr(), b.phys_addr());
		let miss = get_cached_page(&node, 4, false).unwrap();
		assert!(miss.is_none());
		drop(a);
		drop(b);
		reclaim(usize::MAX, None);
	}
}
