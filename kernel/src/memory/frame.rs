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

//! The physical frame allocator.
//!
//! Physical memory is tracked by a bitmap with one bit per frame: a set bit means the frame is
//! used. A parallel array of share counters supports Copy-On-Write: a counter of `n` means the
//! frame is held by `n + 1` owners. Freeing a shared frame decrements the counter; the bitmap
//! bit is cleared only when the counter is already zero. This is the single invariant protecting
//! COW correctness, and no other code path may clear bitmap bits.

use crate::{
	boot::{BootInfo, MEMORY_AVAILABLE},
	memory::{cache, PhysAddr},
	sync::mutex::IntMutex,
};
use core::{
	cmp::min,
	mem::size_of,
	slice,
	sync::atomic::{
		AtomicU8,
		Ordering::{Acquire, Relaxed, Release},
	},
};
use utils::{
	errno::{AllocError, AllocResult},
	limits::PAGE_SIZE,
};

/// The alignment of DMA allocations, in frames. 64 KiB is the strictest requirement among ISA
/// DMA controllers.
const DMA_ALIGN_FRAMES: usize = 65536 / PAGE_SIZE;

/// The number of reclaim rounds before giving up on an allocation.
const RECLAIM_ROUNDS: usize = 2;
/// The age thresholds of the cache reclaim cascade, in milliseconds.
const RECLAIM_AGES: [u64; 3] = [120_000, 60_000, 10_000];

/// The frame bitmap and its allocation state.
struct Allocator {
	/// The bitmap: bit `i` set means frame `i` is used.
	bitmap: &'static mut [usize],
	/// The total number of frames.
	frames: usize,
	/// The number of used frames.
	used: usize,
	/// Hint to the lowest potentially free frame.
	hint: usize,
}

impl Allocator {
	#[inline]
	fn is_used(&self, frame: usize) -> bool {
		self.bitmap[frame / usize::BITS as usize] & (1 << (frame % usize::BITS as usize)) != 0
	}

	#[inline]
	fn set_used(&mut self, frame: usize) {
		debug_assert!(!self.is_used(frame));
		self.bitmap[frame / usize::BITS as usize] |= 1 << (frame % usize::BITS as usize);
		self.used += 1;
	}

	#[inline]
	fn set_free(&mut self, frame: usize) {
		debug_assert!(self.is_used(frame));
		self.bitmap[frame / usize::BITS as usize] &= !(1 << (frame % usize::BITS as usize));
		self.used -= 1;
		self.hint = min(self.hint, frame);
	}

	/// Finds a run of `count` free frames, starting the search at `start` and aligning the run
	/// to `align` frames.
	fn find_run(&self, start: usize, count: usize, align: usize) -> Option<usize> {
		let mut frame = start.next_multiple_of(align);
		while frame + count <= self.frames {
			match (frame..frame + count).rev().find(|f| self.is_used(*f)) {
				// The whole run is free
				None => return Some(frame),
				// Skip past the used frame
				Some(used) => frame = (used + 1).next_multiple_of(align),
			}
		}
		None
	}

	/// Allocates a run of `count` frames aligned to `align` frames, without reclaiming.
	fn alloc(&mut self, count: usize, align: usize) -> Option<PhysAddr> {
		let start = if align == 1 { self.hint } else { 0 };
		let frame = self
			.find_run(start, count, align)
			.or_else(|| (start != 0).then(|| self.find_run(0, count, align)).flatten())?;
		for f in frame..frame + count {
			self.set_used(f);
		}
		self.hint = frame + count;
		Some(PhysAddr(frame * PAGE_SIZE))
	}
}

/// The global frame allocator.
static ALLOCATOR: IntMutex<Allocator> = IntMutex::new(Allocator {
	bitmap: &mut [],
	frames: 0,
	used: 0,
	hint: 0,
});

/// The share counters, one per frame.
static mut SHARES: &[AtomicU8] = &[];

#[inline]
fn shares_slice() -> &'static [AtomicU8] {
	unsafe { *core::ptr::addr_of!(SHARES) }
}

/// Initializes the frame allocator from the boot memory map.
///
/// The bitmap and the share counters are carved out of the largest available region.
pub(crate) fn init(boot_info: &BootInfo) {
	// The total number of frames is given by the highest available address
	let frames = boot_info
		.memmap
		.iter()
		.filter(|e| e.type_ == MEMORY_AVAILABLE)
		.map(|e| (e.addr.0 as u64 + e.len) as usize / PAGE_SIZE)
		.max()
		.unwrap_or(0);
	let bitmap_words = frames.div_ceil(usize::BITS as usize);
	let meta_len = bitmap_words * size_of::<usize>() + frames;
	// Carve the metadata out of the largest available region
	let meta_region = boot_info
		.memmap
		.iter()
		.filter(|e| e.type_ == MEMORY_AVAILABLE && e.len as usize >= meta_len)
		.max_by_key(|e| e.len)
		.expect("not enough memory for the frame allocator");
	let meta_virt = meta_region.addr.kernel_to_virtual().unwrap();
	let (bitmap, shares) = unsafe {
		let bitmap = slice::from_raw_parts_mut(meta_virt.as_ptr::<usize>(), bitmap_words);
		let shares_ptr = meta_virt
			.as_ptr::<AtomicU8>()
			.add(bitmap_words * size_of::<usize>());
		let shares = slice::from_raw_parts(shares_ptr, frames);
		(bitmap, shares)
	};
	// Mark everything used, then free the available regions
	bitmap.fill(!0usize);
	shares.iter().for_each(|s| s.store(0, Relaxed));
	let mut allocator = ALLOCATOR.lock();
	*allocator = Allocator {
		bitmap,
		frames,
		used: frames,
		hint: 0,
	};
	for e in boot_info.memmap.iter().filter(|e| e.type_ == MEMORY_AVAILABLE) {
		let first = e.addr.0.div_ceil(PAGE_SIZE);
		let last = (e.addr.0 + e.len as usize) / PAGE_SIZE;
		for f in first..min(last, frames) {
			if allocator.is_used(f) {
				allocator.set_free(f);
			}
		}
	}
	// Re-reserve the metadata itself
	let meta_first = meta_region.addr.0 / PAGE_SIZE;
	let meta_last = meta_first + meta_len.div_ceil(PAGE_SIZE);
	for f in meta_first..meta_last {
		if !allocator.is_used(f) {
			allocator.set_used(f);
		}
	}
	allocator.hint = 0;
	unsafe {
		SHARES = shares;
	}
}

/// Runs one round of the reclaim cascade, trying to release at least `goal` frames.
///
/// The function returns the number of frames released.
fn reclaim_cascade(goal: usize) -> usize {
	// First drop unreferenced cached pages, then pressure progressively younger pages
	let mut released = cache::reclaim(goal, None);
	for age in RECLAIM_AGES {
		if released >= goal {
			break;
		}
		released += cache::reclaim(goal - released, Some(age));
	}
	released
}

fn alloc_impl(count: usize, align: usize) -> AllocResult<PhysAddr> {
	if count == 0 {
		return Err(AllocError);
	}
	for round in 0..=RECLAIM_ROUNDS {
		if let Some(addr) = ALLOCATOR.lock().alloc(count, align) {
			return Ok(addr);
		}
		if round < RECLAIM_ROUNDS {
			// The goal is at least 10% of the frames, or the request, whichever is larger
			let goal = usize::max(ALLOCATOR.lock().frames / 10, count);
			reclaim_cascade(goal);
		}
	}
	Err(AllocError)
}

/// Allocates a single frame of physical memory.
pub fn alloc_frame() -> AllocResult<PhysAddr> {
	alloc_impl(1, 1)
}

/// Allocates a run of `count` contiguous frames.
pub fn alloc_frames(count: usize) -> AllocResult<PhysAddr> {
	alloc_impl(count, 1)
}

/// Allocates a run of `count` contiguous frames, aligned to 64 KiB for DMA transfers.
pub fn alloc_dma_frames(count: usize) -> AllocResult<PhysAddr> {
	alloc_impl(count, DMA_ALIGN_FRAMES)
}

/// Frees the frame at the given address.
///
/// If the frame is shared, its share counter is decremented and the frame remains allocated for
/// the remaining owners.
///
/// # Safety
///
/// The caller must no longer access the frame after this call.
pub unsafe fn free_frame(addr: PhysAddr) {
	debug_assert!(addr.is_aligned_to(PAGE_SIZE));
	let frame = addr.0 / PAGE_SIZE;
	let shares = shares_slice();
	// Decrement the share counter. If the frame was shared, it stays allocated
	if shares[frame]
		.fetch_update(Release, Acquire, |s| s.checked_sub(1))
		.is_ok()
	{
		return;
	}
	let mut allocator = ALLOCATOR.lock();
	if !allocator.is_used(frame) {
		panic!("double free of frame {addr:?}");
	}
	allocator.set_free(frame);
}

/// Frees a run of `count` frames starting at `addr`.
///
/// # Safety
///
/// See [`free_frame`].
pub unsafe fn free_frames(addr: PhysAddr, count: usize) {
	for i in 0..count {
		free_frame(addr + i * PAGE_SIZE);
	}
}

/// Increments the share counter of the frame at the given address.
///
/// Every operation duplicating a reference to a frame (COW fork, shared mappings) must call
/// this function.
pub fn inc_shares(addr: PhysAddr) {
	debug_assert!(addr.is_aligned_to(PAGE_SIZE));
	let frame = addr.0 / PAGE_SIZE;
	let prev = shares_slice()[frame].fetch_add(1, Release);
	if prev == u8::MAX {
		panic!("frame share counter overflow at {addr:?}");
	}
}

/// Returns the share counter of the frame at the given address.
///
/// Zero means the frame has a single owner.
pub fn shares(addr: PhysAddr) -> u8 {
	shares_slice()[addr.0 / PAGE_SIZE].load(Acquire)
}

/// Returns the number of free frames.
pub fn free_count() -> usize {
	let allocator = ALLOCATOR.lock();
	allocator.frames - allocator.used
}

/// Returns the total number of frames.
pub fn total_count() -> usize {
	ALLOCATOR.lock().frames
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn frame_alloc_free() {
		let free = free_count();
		let a = alloc_frame().unwrap();
		let b = alloc_frame().unwrap();
		assert_ne!(a, b);
		assert_eq!(free_count(), free - 2);
		unsafe {
			free_frame(a);
			free_frame(b);
		}
		assert_eq!(free_count(), free);
	}

	#[test_case]
	fn frame_shares() {
		let free = free_count();
		let a = alloc_frame().unwrap();
		inc_shares(a);
		assert_eq!(shares(a), 1);
		unsafe {
			// First free only drops the share
			free_frame(a);
		}
		assert_eq!(shares(a), 0);
		assert_eq!(free_count(), free - 1);
		unsafe {
			free_frame(a);
		}
		assert_eq!(free_count(), free);
	}

	#[test_case]
	fn frame_dma_align() {
		let a = alloc_dma_frames(4).unwrap();
		assert!(a.is_aligned_to(65536));
		unsafe {
			free_frames(a, 4);
		}
	}

	#[test_case]
	fn frame_contiguous() {
		let a = alloc_frames(8).unwrap();
		let b = alloc_frame().unwrap();
		assert!(b.0 < a.0 || b.0 >= a.0 + 8 * PAGE_SIZE);
		unsafe {
			free_frames(a, 8);
			free_frame(b);
		}
	}
}
