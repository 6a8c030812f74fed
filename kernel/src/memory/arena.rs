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

//! Kernel virtual memory reservation arenas.
//!
//! Each arena is a fixed range `[begin, end)` of kernel virtual memory dedicated to one use
//! (heap, DMA buffers, page cache, ...). Addresses inside an arena are handed out by scanning
//! the kernel page tables for an unset leaf entry.
//!
//! Allocation never half-completes: if the backing frame cannot be allocated, the reserved
//! entry is restored to zero before returning, so the slot is not permanently lost.

use crate::{
	arch::x86::paging,
	arch::x86::paging::{
		FLAG_CACHE_DISABLE, FLAG_GLOBAL, FLAG_PRESENT, FLAG_PRIVATE, FLAG_WRITE,
	},
	memory::{frame, vmem, PhysAddr, VirtAddr},
	sync::mutex::IntMutex,
};
use core::sync::atomic::Ordering::Relaxed;
use utils::{
	errno::{AllocError, AllocResult},
	limits::PAGE_SIZE,
};

/// A kernel reservation arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Arena {
	/// The kernel heap, backing [`crate::memory::malloc`].
	KernelHeap,
	/// Page tables.
	PageTable,
	/// DMA-safe buffers for device drivers.
	Dma,
	/// The page cache.
	Pcache,
	/// The temporary filesystem.
	Tmpfs,
	/// Kernel modules.
	Kmodule,
	/// Memory shared with userspace.
	UserShm,
}

/// The number of arenas.
const ARENAS_COUNT: usize = 7;

/// A reserved, not yet backed leaf entry. Must not have [`FLAG_PRESENT`] set.
const RESERVED_ENTRY: usize = FLAG_PRIVATE;

/// The allocation state of one arena. The mutex serializes scanning and reserving only:
/// backing allocation happens outside it.
struct State {
	/// The bounds of the arena.
	begin: VirtAddr,
	end: VirtAddr,
	/// Hint to the lowest potentially free address.
	hint: VirtAddr,
}

/// One terabyte, the size of each arena.
const ARENA_SIZE: usize = 1 << 40;
/// The base address of the first arena, above the physical memory direct mapping.
const ARENAS_BEGIN: usize = 0xffffc00000000000;

const fn state(index: usize) -> IntMutex<State> {
	let begin = VirtAddr(ARENAS_BEGIN + index * ARENA_SIZE);
	IntMutex::new(State {
		begin,
		end: VirtAddr(begin.0 + ARENA_SIZE),
		hint: begin,
	})
}

/// The arenas, in the same order as the [`Arena`] enumeration.
static ARENAS: [IntMutex<State>; ARENAS_COUNT] = [
	state(0),
	state(1),
	state(2),
	state(3),
	state(4),
	state(5),
	state(6),
];

impl Arena {
	#[inline]
	fn status(self) -> &'static IntMutex<State> {
		&ARENAS[self as usize]
	}

	/// Returns the bounds of the arena.
	pub fn bounds(self) -> (VirtAddr, VirtAddr) {
		let state = self.status().lock();
		(state.begin, state.end)
	}
}

/// Initializes the arenas. Called once the kernel virtual memory context is bound.
pub(crate) fn init() {
	// Nothing to build: arenas are lazily populated. This hook exists so that the boot sequence
	// reflects the dependency order
}

/// Scans the arena for the next virtual address whose leaf entry is unset.
///
/// The entry of the returned address is reserved: concurrent calls do not return the same
/// address. The caller must either back the entry or release it with [`release_addr`].
fn find_and_reserve(arena: Arena) -> AllocResult<(VirtAddr, &'static paging::Entry)> {
	// The kernel table entries are atomic: the VMem mutex is not needed, which matters because
	// the frame allocation below this reservation may re-enter the arena through the reclaim
	// cascade
	let table = paging::kernel_table();
	let mut state = arena.status().lock();
	let mut addr = state.hint;
	while addr < state.end {
		let entry = paging::get_entry(table, addr, true)?.ok_or(AllocError)?;
		if entry.load(Relaxed) == 0 {
			entry.store(RESERVED_ENTRY, Relaxed);
			state.hint = addr + PAGE_SIZE;
			return Ok((addr, entry));
		}
		addr = addr + PAGE_SIZE;
	}
	Err(AllocError)
}

/// Restores a reserved entry to zero.
fn release_addr(arena: Arena, addr: VirtAddr, entry: &paging::Entry) {
	entry.store(0, Relaxed);
	let mut state = arena.status().lock();
	if addr < state.hint {
		state.hint = addr;
	}
}

/// Returns the next free virtual address of the arena, without backing it.
pub fn find_free_addr(arena: Arena) -> AllocResult<VirtAddr> {
	let (addr, entry) = find_and_reserve(arena)?;
	release_addr(arena, addr, entry);
	Ok(addr)
}

/// Allocates a fresh physical frame, maps it at the next free virtual address of the arena and
/// returns both addresses.
///
/// `flags` are the paging flags for the mapping; [`FLAG_PRESENT`] is implied.
///
/// Either the whole operation succeeds, or no side effect remains.
pub fn alloc_mapped_page(arena: Arena, flags: usize) -> AllocResult<(PhysAddr, VirtAddr)> {
	let (addr, entry) = find_and_reserve(arena)?;
	// The reservation protects the slot: the frame allocation (which may run the reclaim
	// cascade) happens without holding the arena lock
	let phys = match frame::alloc_frame() {
		Ok(phys) => phys,
		Err(e) => {
			release_addr(arena, addr, entry);
			return Err(e);
		}
	};
	if arena == Arena::PageTable {
		paging::TABLE_FRAMES.fetch_add(1, Relaxed);
	}
	entry.store(phys.0 | (flags & paging::FLAGS_MASK) | FLAG_PRESENT, Relaxed);
	vmem::invalidate_page(addr);
	Ok((phys, addr))
}

/// Allocates `count` virtually contiguous pages in the arena, each backed by a fresh physical
/// frame.
///
/// On success, the function returns the virtual address of the beginning of the range. Either
/// the whole operation succeeds, or no side effect remains.
pub fn alloc_mapped_range(arena: Arena, count: usize, flags: usize) -> AllocResult<VirtAddr> {
	if count == 0 {
		return Err(AllocError);
	}
	let table = paging::kernel_table();
	// Reserve a run of `count` unset entries
	let begin = {
		let mut state = arena.status().lock();
		let mut begin = state.hint;
		'scan: loop {
			if begin + count * PAGE_SIZE > state.end {
				return Err(AllocError);
			}
			for i in 0..count {
				let entry = paging::get_entry(table, begin + i * PAGE_SIZE, true)?
					.ok_or(AllocError)?;
				if entry.load(Relaxed) != 0 {
					begin = begin + (i + 1) * PAGE_SIZE;
					continue 'scan;
				}
			}
			for i in 0..count {
				let entry = paging::get_entry(table, begin + i * PAGE_SIZE, false)?.unwrap();
				entry.store(RESERVED_ENTRY, Relaxed);
			}
			state.hint = begin + count * PAGE_SIZE;
			break begin;
		}
	};
	// Back each reserved entry with a frame
	for i in 0..count {
		let addr = begin + i * PAGE_SIZE;
		let entry = paging::get_entry(table, addr, false).unwrap().unwrap();
		match frame::alloc_frame() {
			Ok(phys) => {
				entry.store(phys.0 | (flags & paging::FLAGS_MASK) | FLAG_PRESENT, Relaxed);
				vmem::invalidate_page(addr);
			}
			Err(e) => {
				// Roll back: free the frames already mapped and restore every entry to zero
				for j in 0..i {
					let addr = begin + j * PAGE_SIZE;
					unsafe {
						free_mapped_page(arena, addr);
					}
				}
				release_addr(arena, addr, entry);
				for j in i + 1..count {
					let entry = paging::get_entry(table, begin + j * PAGE_SIZE, false)
						.unwrap()
						.unwrap();
					entry.store(0, Relaxed);
				}
				return Err(e);
			}
		}
	}
	Ok(begin)
}

/// Frees a range of pages allocated with [`alloc_mapped_range`].
///
/// # Safety
///
/// The caller must no longer access the pages after this call.
pub unsafe fn free_mapped_range(arena: Arena, addr: VirtAddr, count: usize) {
	for i in 0..count {
		free_mapped_page(arena, addr + i * PAGE_SIZE);
	}
}

/// Frees a page allocated with [`alloc_mapped_page`].
///
/// # Safety
///
/// The caller must no longer access the page after this call.
pub unsafe fn free_mapped_page(arena: Arena, addr: VirtAddr) {
	let table = paging::kernel_table();
	let phys = {
		// Serialize structural changes of the arena's page tables
		let mut state = arena.status().lock();
		let Some(phys) = paging::translate(table, addr) else {
			panic!("freeing an unmapped arena page at {addr:?}");
		};
		paging::unmap(table, addr);
		vmem::invalidate_page(addr);
		if addr < state.hint {
			state.hint = addr;
		}
		phys
	};
	frame::free_frame(phys);
	if arena == Arena::PageTable {
		paging::TABLE_FRAMES.fetch_sub(1, Relaxed);
	}
}

/// Returns the default paging flags for the given arena.
pub fn default_flags(arena: Arena) -> usize {
	match arena {
		Arena::Dma => FLAG_WRITE | FLAG_GLOBAL | FLAG_CACHE_DISABLE,
		_ => FLAG_WRITE | FLAG_GLOBAL,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::memory::vmem::KERNEL_VMEM;

	#[test_case]
	fn arena_alloc_free() {
		let (phys, virt) = alloc_mapped_page(Arena::KernelHeap, default_flags(Arena::KernelHeap))
			.unwrap();
		assert!(virt.is_aligned_to(PAGE_SIZE));
		// The mapping is live: write then read back
		unsafe {
			virt.as_ptr::<u64>().write_volatile(0xdeadbeef);
			assert_eq!(virt.as_ptr::<u64>().read_volatile(), 0xdeadbeef);
		}
		assert_eq!(KERNEL_VMEM.get().lock().translate(virt), Some(phys));
		unsafe {
			free_mapped_page(Arena::KernelHeap, virt);
		}
	}

	#[test_case]
	fn arena_distinct_addrs() {
		let (_, a) = alloc_mapped_page(Arena::Tmpfs, default_flags(Arena::Tmpfs)).unwrap();
		let (_, b) = alloc_mapped_page(Arena::Tmpfs, default_flags(Arena::Tmpfs)).unwrap();
		assert_ne!(a, b);
		unsafe {
			free_mapped_page(Arena::Tmpfs, a);
			free_mapped_page(Arena::Tmpfs, b);
		}
	}
}
