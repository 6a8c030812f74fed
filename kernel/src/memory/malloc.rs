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

//! The kernel heap allocator, registered as the global allocator.
//!
//! Small allocations are served from power-of-two buckets carved out of pages of the
//! kernel-heap arena. Allocations larger than half a page get their own page range.

use crate::{
	memory::arena,
	memory::arena::Arena,
	sync::mutex::IntMutex,
	memory::VirtAddr,
};
use core::{
	alloc::{GlobalAlloc, Layout},
	ops::{Index, IndexMut},
	ptr,
	ptr::null_mut,
};
use utils::limits::PAGE_SIZE;

/// The smallest bucket size, in bytes.
const MIN_SIZE: usize = 16;
/// The largest bucket size, in bytes. Above this, allocations get whole pages.
const MAX_SIZE: usize = 2048;
/// The number of buckets.
const BUCKETS_COUNT: usize = (MAX_SIZE / MIN_SIZE).trailing_zeros() as usize + 1;

/// A free slot, linked into its bucket's free list.
struct FreeSlot {
	next: *mut FreeSlot,
}

unsafe impl Send for FreeSlot {}

/// The buckets' free lists.
///
/// Wraps the array instead of using it directly so the `Mutex` guarding it can be `Sync`:
/// access is always serialized through the lock, so sharing the raw pointers across CPUs is
/// safe even though `*mut FreeSlot` is not `Send` on its own.
struct BucketList([*mut FreeSlot; BUCKETS_COUNT]);

unsafe impl Send for BucketList {}

impl Index<usize> for BucketList {
	type Output = *mut FreeSlot;

	fn index(&self, index: usize) -> &Self::Output {
		&self.0[index]
	}
}

impl IndexMut<usize> for BucketList {
	fn index_mut(&mut self, index: usize) -> &mut Self::Output {
		&mut self.0[index]
	}
}

/// The buckets' free lists.
static BUCKETS: IntMutex<BucketList> = IntMutex::new(BucketList([null_mut(); BUCKETS_COUNT]));

/// Returns the bucket size for the given layout.
fn slot_size(layout: Layout) -> usize {
	layout
		.size()
		.max(layout.align())
		.next_power_of_two()
		.max(MIN_SIZE)
}

/// The kernel heap allocator.
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		let size = slot_size(layout);
		if size > MAX_SIZE {
			// Large allocation: dedicated pages
			let pages = layout.size().div_ceil(PAGE_SIZE);
			return match arena::alloc_mapped_range(
				Arena::KernelHeap,
				pages,
				arena::default_flags(Arena::KernelHeap),
			) {
				Ok(addr) => addr.as_ptr(),
				Err(_) => null_mut(),
			};
		}
		let bucket = (size / MIN_SIZE).trailing_zeros() as usize;
		let mut buckets = BUCKETS.lock();
		if buckets[bucket].is_null() {
			// Carve a fresh page into slots
			let Ok((_, page)) = arena::alloc_mapped_page(
				Arena::KernelHeap,
				arena::default_flags(Arena::KernelHeap),
			) else {
				return null_mut();
			};
			let mut head = null_mut();
			for off in (0..PAGE_SIZE).step_by(size).rev() {
				let slot = (page + off).as_ptr::<FreeSlot>();
				(*slot).next = head;
				head = slot;
			}
			buckets[bucket] = head;
		}
		let slot = buckets[bucket];
		buckets[bucket] = (*slot).next;
		slot as *mut u8
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		let size = slot_size(layout);
		if size > MAX_SIZE {
			let pages = layout.size().div_ceil(PAGE_SIZE);
			arena::free_mapped_range(Arena::KernelHeap, VirtAddr::from(ptr), pages);
			return;
		}
		let bucket = (size / MIN_SIZE).trailing_zeros() as usize;
		let slot = ptr as *mut FreeSlot;
		let mut buckets = BUCKETS.lock();
		(*slot).next = buckets[bucket];
		buckets[bucket] = slot;
	}

	unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
		let ptr = self.alloc(layout);
		if !ptr.is_null() {
			ptr::write_bytes(ptr, 0, layout.size());
		}
		ptr
	}
}

/// The global allocator instance.
#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[cfg(test)]
mod test {
	use super::*;
	use utils::collections::vec::Vec;

	#[test_case]
	fn malloc_roundtrip() {
		let mut v: Vec<u64> = Vec::new();
		for i in 0..1000 {
			v.push(i).unwrap();
		}
		assert_eq!(v.iter().sum::<u64>(), 999 * 1000 / 2);
	}

	#[test_case]
	fn malloc_buckets_reuse() {
		let layout = Layout::from_size_align(64, 8).unwrap();
		unsafe {
			let a = ALLOCATOR.alloc(layout);
			assert!(!a.is_null());
			ALLOCATOR.dealloc(a, layout);
			let b = ALLOCATOR.alloc(layout);
			// The freed slot is reused first
			assert_eq!(a, b);
			ALLOCATOR.dealloc(b, layout);
		}
	}
}
