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

//! A memory space is the virtual memory handler of a process.
//!
//! It holds the process's memory regions: an address-ordered, non-overlapping sequence of
//! contiguous ranges, each with its own protection, type and optional file backing. Physical
//! memory is attached lazily, on page fault. The Copy-On-Write fault, the allocation and the
//! TLB flush all complete under the space's lock, so a concurrent fork cannot observe a torn
//! state.

mod region;

use crate::{
	arch::x86::paging,
	file::Node,
	memory::{cache, frame, vmem, vmem::VMem, PhysAddr, VirtAddr, PROCESS_END},
	sync::mutex::IntMutex,
};
use core::{cmp::min, hint::unlikely};
pub use region::{MemRegion, RegionType};
use utils::{
	collections::vec::Vec,
	errno,
	errno::{AllocResult, EResult},
	limits::PAGE_SIZE,
	ptr::arc::Arc,
	TryClone,
};

/// Region can be read.
pub const PROT_READ: u8 = 0x1;
/// Region can be written.
pub const PROT_WRITE: u8 = 0x2;
/// Region can be executed.
pub const PROT_EXEC: u8 = 0x4;

/// Changes are shared across mappings of the same backing.
pub const MAP_SHARED: u32 = 0x01;
/// Changes are private to the mapping.
pub const MAP_PRIVATE: u32 = 0x02;
/// Interpret the address exactly.
pub const MAP_FIXED: u32 = 0x10;
/// The mapping is not backed by any file.
pub const MAP_ANONYMOUS: u32 = 0x20;
/// The mapping belongs to the vDSO.
pub const MAP_VDSO: u32 = 0x100;

/// The end of usable userspace memory.
pub const USER_MEM_END: VirtAddr = PROCESS_END;
/// The top of the initial userspace stack.
pub const STACK_START: VirtAddr = VirtAddr(PROCESS_END.0 - PAGE_SIZE);
/// The base address used to pick mapping addresses.
const MMAP_BASE: VirtAddr = VirtAddr(0x10000000000);

/// The inner state of a memory space: the region list, address-ordered.
#[derive(Debug, Default)]
struct State {
	/// The regions of the space. No two regions overlap.
	regions: Vec<MemRegion>,
	/// The initial program break.
	brk_init: VirtAddr,
	/// The current program break.
	brk: VirtAddr,
}

impl State {
	/// Returns the index of the region containing `addr`, if any.
	fn containing(&self, addr: VirtAddr) -> Option<usize> {
		self.regions
			.binary_search_by(|r| {
				use core::cmp::Ordering;
				if addr < r.addr {
					Ordering::Greater
				} else if addr >= r.end() {
					Ordering::Less
				} else {
					Ordering::Equal
				}
			})
			.ok()
	}

	/// Tells whether the range `[addr, addr + pages * PAGE_SIZE)` overlaps a region.
	fn overlaps(&self, addr: VirtAddr, pages: usize) -> bool {
		let end = addr + pages * PAGE_SIZE;
		self.regions
			.iter()
			.any(|r| r.addr < end && addr < r.end())
	}

	/// Finds a free range of `pages` pages, starting the search at `hint`.
	fn find_free(&self, hint: VirtAddr, pages: usize) -> EResult<VirtAddr> {
		let mut addr = if hint.is_null() { MMAP_BASE } else { hint };
		addr = addr.down_align_to(PAGE_SIZE);
		loop {
			if addr + pages * PAGE_SIZE > USER_MEM_END {
				return Err(errno!(ENOMEM));
			}
			// Find the first region colliding with the candidate range
			let end = addr + pages * PAGE_SIZE;
			let collision = self
				.regions
				.iter()
				.filter(|r| r.addr < end && addr < r.end())
				.min_by_key(|r| r.addr);
			match collision {
				None => return Ok(addr),
				Some(r) => addr = r.end(),
			}
		}
	}

	/// Inserts `region`, keeping the list ordered.
	fn insert(&mut self, region: MemRegion) -> AllocResult<()> {
		let i = self
			.regions
			.binary_search_by(|r| r.addr.cmp(&region.addr))
			.unwrap_or_else(|i| i);
		self.regions.insert(i, region)
	}
}

/// A virtual memory space.
#[derive(Debug)]
pub struct MemSpace {
	/// The space's regions, used as a model for the virtual memory context.
	state: IntMutex<State>,
	/// The architecture-specific virtual memory context.
	vmem: IntMutex<VMem>,
}

impl MemSpace {
	/// Creates a new, empty memory space.
	pub fn new() -> EResult<Arc<Self>> {
		Ok(Arc::new(Self {
			state: IntMutex::new(State::default()),
			vmem: IntMutex::new(VMem::new()?),
		})?)
	}

	/// Maps a region of `pages` pages.
	///
	/// Arguments:
	/// - `addr` is a hint, or the exact address when `flags` contains [`MAP_FIXED`]
	/// - `prot` is the memory protection
	/// - `kind` is the type of the region
	/// - `flags` are the mapping flags
	/// - `node`, `file_off` and `file_len` describe the file backing, if any
	/// - `may_overlap` allows the new region to replace existing overlapping ranges. Without
	///   it, an overlap fails with [`errno::EEXIST`]
	///
	/// On success, the function returns the address of the region.
	#[allow(clippy::too_many_arguments)]
	pub fn map(
		&self,
		addr: VirtAddr,
		pages: usize,
		prot: u8,
		kind: RegionType,
		flags: u32,
		node: Option<Arc<Node>>,
		file_off: u64,
		file_len: u64,
		may_overlap: bool,
	) -> EResult<VirtAddr> {
		if unlikely(pages == 0 || !addr.is_aligned_to(PAGE_SIZE)) {
			return Err(errno!(EINVAL));
		}
		if unlikely(flags & (MAP_PRIVATE | MAP_SHARED) == 0) {
			return Err(errno!(EINVAL));
		}
		let mut state = self.state.lock();
		let addr = if flags & MAP_FIXED != 0 {
			if addr + pages * PAGE_SIZE > USER_MEM_END || addr.is_null() {
				return Err(errno!(ENOMEM));
			}
			if state.overlaps(addr, pages) {
				if !may_overlap {
					return Err(errno!(EEXIST));
				}
				let vmem = self.vmem.lock();
				Self::remove_range_impl(&mut state, &vmem, addr, pages)?;
			}
			addr
		} else {
			state.find_free(addr, pages)?
		};
		state.insert(MemRegion {
			addr,
			pages,
			prot,
			kind,
			flags: flags & !MAP_FIXED,
			node,
			file_off,
			file_len,
		})?;
		Ok(addr)
	}

	/// Translates the given virtual address to the mapped physical address, if any.
	pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
		self.vmem.lock().translate(addr)
	}

	/// Returns the region containing `addr`, if any.
	pub fn region_at(&self, addr: VirtAddr) -> Option<MemRegion> {
		let state = self.state.lock();
		let i = state.containing(addr)?;
		state.regions[i].try_clone().ok()
	}

	/// Returns the number of regions of the space.
	pub fn region_count(&self) -> usize {
		self.state.lock().regions.len()
	}

	/// Returns the number of pages covered by the regions of the space.
	pub fn covered_pages(&self) -> usize {
		self.state.lock().regions.iter().map(|r| r.pages).sum()
	}

	/// Writes back the dirty pages of the range `[addr, addr + pages * PAGE_SIZE)` of `region`
	/// to its backing file.
	fn msync_range(region: &MemRegion, vmem: &VMem, addr: VirtAddr, pages: usize) -> EResult<()> {
		let Some(node) = &region.node else {
			return Ok(());
		};
		if region.flags & MAP_SHARED == 0 || region.prot & PROT_WRITE == 0 {
			return Ok(());
		}
		for i in 0..pages {
			let page_addr = addr + i * PAGE_SIZE;
			let Some((_, dirty)) = vmem.poll_dirty(page_addr) else {
				continue;
			};
			if !dirty {
				continue;
			}
			let file_page =
				region.file_off / PAGE_SIZE as u64 + ((page_addr.0 - region.addr.0) / PAGE_SIZE) as u64;
			if let Some(page) = cache::get_cached_page(node, file_page, false)? {
				page.mark_dirty();
				page.writeback()?;
			}
		}
		Ok(())
	}

	/// Detaches every present page of the given range: the frames are freed (share-count
	/// aware) and the entries are zeroed.
	fn detach_pages(vmem: &VMem, addr: VirtAddr, pages: usize) {
		for i in 0..pages {
			let page_addr = addr + i * PAGE_SIZE;
			if let Some((phys, _)) = vmem.entry(page_addr) {
				unsafe {
					frame::free_frame(phys);
				}
				vmem.unmap(page_addr);
			}
		}
	}

	fn remove_range_impl(
		state: &mut State,
		vmem: &VMem,
		addr: VirtAddr,
		pages: usize,
	) -> EResult<()> {
		let end = addr + pages * PAGE_SIZE;
		let mut i = 0;
		while i < state.regions.len() {
			let r = &state.regions[i];
			if r.end() <= addr || end <= r.addr {
				i += 1;
				continue;
			}
			// Bounds of the removed part, inside the region
			let rm_begin = VirtAddr(usize::max(r.addr.0, addr.0));
			let rm_end = VirtAddr(usize::min(r.end().0, end.0));
			let rm_pages = (rm_end.0 - rm_begin.0) / PAGE_SIZE;
			// Shared file-backed writable regions are synchronized before detach
			Self::msync_range(r, vmem, rm_begin, rm_pages)?;
			Self::detach_pages(vmem, rm_begin, rm_pages);
			let r = state.regions.remove(i);
			let (prev, next) = r.split(rm_begin, rm_pages);
			if let Some(prev) = prev {
				state.insert(prev)?;
				i += 1;
			}
			if let Some(next) = next {
				state.insert(next)?;
				i += 1;
			}
		}
		Ok(())
	}

	/// Unmaps the given range, splitting the regions that cross its bounds.
	///
	/// For each removed range of a shared, writable, file-backed region, dirty pages are
	/// written back before being detached.
	pub fn unmap(&self, addr: VirtAddr, pages: usize) -> EResult<()> {
		if unlikely(!addr.is_aligned_to(PAGE_SIZE) || pages == 0) {
			return Err(errno!(EINVAL));
		}
		let mut state = self.state.lock();
		let vmem = self.vmem.lock();
		Self::remove_range_impl(&mut state, &vmem, addr, pages)
	}

	/// Changes the protection of the given range, splitting the regions that cross its bounds.
	///
	/// Pages of a shared file-backed region that lose writability are written back and
	/// detached.
	pub fn set_prot(&self, addr: VirtAddr, pages: usize, prot: u8) -> EResult<()> {
		if unlikely(!addr.is_aligned_to(PAGE_SIZE) || pages == 0) {
			return Err(errno!(EINVAL));
		}
		let end = addr + pages * PAGE_SIZE;
		let mut state = self.state.lock();
		let vmem = self.vmem.lock();
		// The whole range must be mapped
		let mut cur = addr;
		while cur < end {
			let i = state.containing(cur).ok_or_else(|| errno!(ENOMEM))?;
			cur = state.regions[i].end();
		}
		let mut i = 0;
		while i < state.regions.len() {
			let r = &state.regions[i];
			if r.end() <= addr || end <= r.addr {
				i += 1;
				continue;
			}
			let ch_begin = VirtAddr(usize::max(r.addr.0, addr.0));
			let ch_end = VirtAddr(usize::min(r.end().0, end.0));
			let ch_pages = (ch_end.0 - ch_begin.0) / PAGE_SIZE;
			if r.prot == prot {
				i += 1;
				continue;
			}
			let lose_write = r.prot & PROT_WRITE != 0 && prot & PROT_WRITE == 0;
			if lose_write && r.flags & MAP_SHARED != 0 && r.node.is_some() {
				Self::msync_range(r, &vmem, ch_begin, ch_pages)?;
				Self::detach_pages(&vmem, ch_begin, ch_pages);
			} else {
				// Rewrite the flags of each present page
				for p in 0..ch_pages {
					let page_addr = ch_begin + p * PAGE_SIZE;
					let Some((phys, flags)) = vmem.entry(page_addr) else {
						continue;
					};
					let cow = flags & paging::FLAG_COW != 0;
					let new_flags = Self::page_flags(prot, r.flags, cow);
					vmem.map(phys, page_addr, new_flags)?;
				}
			}
			// Split the region if the change does not cover it entirely
			let r = state.regions.remove(i);
			let (prev, mid, next) = r.split_for_prot(ch_begin, ch_pages, prot);
			if let Some(prev) = prev {
				state.insert(prev)?;
				i += 1;
			}
			state.insert(mid)?;
			i += 1;
			if let Some(next) = next {
				state.insert(next)?;
				i += 1;
			}
		}
		Self::consolidate_impl(&mut state);
		Ok(())
	}

	/// Merges adjacent regions with identical attributes and contiguous file backing.
	pub fn consolidate(&self) {
		let mut state = self.state.lock();
		Self::consolidate_impl(&mut state);
	}

	fn consolidate_impl(state: &mut State) {
		let mut i = 0;
		while i + 1 < state.regions.len() {
			let (a, b) = (&state.regions[i], &state.regions[i + 1]);
			if a.can_merge_with(b) {
				let pages = b.pages;
				state.regions[i].pages += pages;
				state.regions.remove(i + 1);
			} else {
				i += 1;
			}
		}
	}

	/// Returns the paging flags for a page of a region.
	fn page_flags(prot: u8, flags: u32, cow: bool) -> usize {
		let mut pf = paging::FLAG_USER;
		if prot & PROT_WRITE != 0 && !cow {
			pf |= paging::FLAG_WRITE;
		}
		if cow {
			pf |= paging::FLAG_COW;
		}
		if prot & PROT_EXEC == 0 {
			pf |= paging::FLAG_XD;
		}
		if flags & MAP_SHARED == 0 {
			pf |= paging::FLAG_PRIVATE;
		}
		pf
	}

	/// Populates the page at `page_addr` of the region `region`.
	fn populate_page(region: &MemRegion, vmem: &VMem, page_addr: VirtAddr, write: bool) -> EResult<()> {
		let page_flags = Self::page_flags(region.prot, region.flags, false);
		match &region.node {
			// Anonymous mapping: a fresh zeroed frame
			None => {
				let phys = frame::alloc_frame()?;
				let virt = phys.kernel_to_virtual().unwrap();
				unsafe {
					core::slice::from_raw_parts_mut(virt.as_ptr::<u8>(), PAGE_SIZE).fill(0);
				}
				vmem.map(phys, page_addr, page_flags)?;
			}
			// File-backed mapping: the frame comes from the page cache
			Some(node) => {
				let region_off = ((page_addr.0 - region.addr.0) / PAGE_SIZE) as u64;
				let file_page = region.file_off / PAGE_SIZE as u64 + region_off;
				let page = cache::get_cached_page(node, file_page, true)?
					.ok_or_else(|| errno!(EIO))?;
				let phys = page.phys_addr();
				if region.flags & MAP_PRIVATE != 0 {
					if write {
						// Private write: copy the cache page right away
						let new = frame::alloc_frame()?;
						let dst = new.kernel_to_virtual().unwrap();
						unsafe {
							core::ptr::copy_nonoverlapping(
								page.slice().as_ptr(),
								dst.as_ptr::<u8>(),
								PAGE_SIZE,
							);
						}
						vmem.map(new, page_addr, page_flags)?;
					} else {
						// Map the cache frame read-only, pending Copy-On-Write
						frame::inc_shares(phys);
						let flags = Self::page_flags(region.prot, region.flags, true);
						vmem.map(phys, page_addr, flags)?;
					}
				} else {
					// Shared mapping: the cache frame itself
					frame::inc_shares(phys);
					vmem.map(phys, page_addr, page_flags)?;
				}
			}
		}
		Ok(())
	}

	/// Resolves the Copy-On-Write fault at `page_addr`.
	///
	/// The entry must be present, read-only, with the COW bit.
	fn cow_fault(vmem: &VMem, page_addr: VirtAddr, entry_flags: usize) -> EResult<()> {
		let (phys, _) = vmem.entry(page_addr).unwrap();
		let flags = (entry_flags & !paging::FLAG_COW) | paging::FLAG_WRITE;
		if frame::shares(phys) == 0 {
			// Sole owner: just flip the entry writable
			vmem.map(phys, page_addr, flags)?;
			return Ok(());
		}
		// Copy the page to a fresh frame
		let new = frame::alloc_frame()?;
		let src = phys.kernel_to_virtual().unwrap();
		let dst = new.kernel_to_virtual().unwrap();
		unsafe {
			core::ptr::copy_nonoverlapping(src.as_ptr::<u8>(), dst.as_ptr::<u8>(), PAGE_SIZE);
		}
		vmem.map(new, page_addr, flags)?;
		unsafe {
			// Drop our share of the old frame
			frame::free_frame(phys);
		}
		Ok(())
	}

	/// Handles a page fault at `addr` with the error code `code`.
	///
	/// If the fault was resolved and the process can continue, the function returns `true`.
	pub fn handle_page_fault(&self, addr: VirtAddr, code: u32) -> EResult<bool> {
		let state = self.state.lock();
		let vmem = self.vmem.lock();
		let Some(i) = state.containing(addr) else {
			return Ok(false);
		};
		let region = &state.regions[i];
		let write = code & paging::PAGE_FAULT_WRITE != 0;
		if unlikely(write && region.prot & PROT_WRITE == 0) {
			return Ok(false);
		}
		if unlikely(code & paging::PAGE_FAULT_INSTRUCTION != 0 && region.prot & PROT_EXEC == 0)
		{
			return Ok(false);
		}
		let page_addr = addr.down_align_to(PAGE_SIZE);
		match vmem.entry(page_addr) {
			// Write on a present, read-only, COW page
			Some((_, flags)) if write && flags & paging::FLAG_COW != 0 => {
				Self::cow_fault(&vmem, page_addr, flags)?;
			}
			// Present page, nothing to resolve (spurious fault or TLB stale entry)
			Some(_) => {
				vmem::invalidate_page(page_addr);
			}
			// Missing page: populate on demand
			None => {
				Self::populate_page(region, &vmem, page_addr, write)?;
			}
		}
		Ok(true)
	}

	/// Ensures the range `[addr, addr + len)` is mapped and accessible, populating missing
	/// pages.
	///
	/// If `write` is set, the range must be writable; Copy-On-Write pages are resolved.
	pub fn populate(&self, addr: VirtAddr, len: usize, write: bool) -> EResult<()> {
		if addr + len > USER_MEM_END {
			return Err(errno!(EFAULT));
		}
		let state = self.state.lock();
		let vmem = self.vmem.lock();
		let mut page_addr = addr.down_align_to(PAGE_SIZE);
		let end = addr + len;
		while page_addr < end {
			let i = state.containing(page_addr).ok_or_else(|| errno!(EFAULT))?;
			let region = &state.regions[i];
			if write && region.prot & PROT_WRITE == 0 {
				return Err(errno!(EFAULT));
			}
			match vmem.entry(page_addr) {
				Some((_, flags)) if write && flags & paging::FLAG_COW != 0 => {
					Self::cow_fault(&vmem, page_addr, flags)
						.map_err(|_| errno!(EFAULT))?;
				}
				Some(_) => {}
				None => {
					Self::populate_page(region, &vmem, page_addr, write)
						.map_err(|_| errno!(EFAULT))?;
				}
			}
			page_addr = page_addr + PAGE_SIZE;
		}
		Ok(())
	}

	/// Writes `buf` at the address `addr` of the space, populating pages as needed.
	///
	/// This is used to build the initial image of a program (stack, zero-filled segment
	/// tails), without the space being bound.
	pub fn write_user(&self, addr: VirtAddr, buf: &[u8]) -> EResult<()> {
		self.populate(addr, buf.len(), true)?;
		let vmem = self.vmem.lock();
		let mut done = 0;
		while done < buf.len() {
			let cur = addr + done;
			let page_addr = cur.down_align_to(PAGE_SIZE);
			let inner = cur.0 - page_addr.0;
			let chunk = min(buf.len() - done, PAGE_SIZE - inner);
			let (phys, _) = vmem.entry(page_addr).ok_or_else(|| errno!(EFAULT))?;
			let dst = phys.kernel_to_virtual().unwrap() + inner;
			unsafe {
				core::ptr::copy_nonoverlapping(
					buf[done..].as_ptr(),
					dst.as_ptr::<u8>(),
					chunk,
				);
			}
			done += chunk;
		}
		Ok(())
	}

	/// Attaches the physical frame `phys` at the address `addr` of the space, taking a share
	/// of it.
	///
	/// The address must be covered by a region. This is used by the vDSO, whose pages are
	/// provided by the kernel instead of being populated on fault.
	pub fn attach_frame(&self, addr: VirtAddr, phys: PhysAddr, prot: u8, flags: u32) -> EResult<()> {
		let state = self.state.lock();
		let vmem = self.vmem.lock();
		if state.containing(addr).is_none() {
			return Err(errno!(EFAULT));
		}
		frame::inc_shares(phys);
		vmem.map(phys, addr, Self::page_flags(prot, flags, false))?;
		Ok(())
	}

	/// Synchronizes the given range to the backing storage.
	pub fn sync(&self, addr: VirtAddr, pages: usize) -> EResult<()> {
		let state = self.state.lock();
		let vmem = self.vmem.lock();
		let end = addr + pages * PAGE_SIZE;
		for r in state.regions.iter() {
			if r.end() <= addr || end <= r.addr {
				continue;
			}
			let begin = VirtAddr(usize::max(r.addr.0, addr.0));
			let count = (min(r.end().0, end.0) - begin.0) / PAGE_SIZE;
			Self::msync_range(r, &vmem, begin, count)?;
		}
		Ok(())
	}

	/// Clones the space for process forking: the child gets the same regions, and every
	/// writable private page of both sides becomes Copy-On-Write.
	pub fn fork(&self) -> EResult<Arc<Self>> {
		let state = self.state.lock();
		let vmem = self.vmem.lock();
		let mut regions = Vec::with_capacity(state.regions.len())?;
		for r in state.regions.iter() {
			regions.push(r.try_clone()?)?;
		}
		let child_vmem = vmem.fork()?;
		Ok(Arc::new(Self {
			state: IntMutex::new(State {
				regions,
				brk_init: state.brk_init,
				brk: state.brk,
			}),
			vmem: IntMutex::new(child_vmem),
		})?)
	}

	/// Detaches every region, synchronizing shared file-backed regions, and frees the user
	/// half of the virtual memory context.
	pub fn clear(&self) {
		let mut state = self.state.lock();
		let vmem = self.vmem.lock();
		for r in state.regions.iter() {
			// Ignore I/O errors: the address space is going away regardless
			let _ = Self::msync_range(r, &vmem, r.addr, r.pages);
		}
		state.regions.clear();
		vmem.unmap_user_all();
	}

	/// Binds the space's virtual memory context to the current CPU.
	pub fn bind(&self) {
		self.vmem.lock().bind();
	}

	/// Tells whether the space's virtual memory context is bound to the current CPU.
	pub fn is_bound(&self) -> bool {
		self.vmem.lock().is_bound()
	}

	/// Sets the initial program break. Must be called once, before the program runs.
	pub fn set_brk_init(&self, addr: VirtAddr) {
		let mut state = self.state.lock();
		state.brk_init = addr;
		state.brk = addr;
	}

	/// Implements the `brk` system call.
	///
	/// On failure, the function does nothing and returns the current break.
	pub fn brk(&self, addr: VirtAddr) -> VirtAddr {
		let old = self.state.lock().brk;
		if addr >= old {
			let begin = old.align_to(PAGE_SIZE);
			let pages = (addr.align_to(PAGE_SIZE).0 - begin.0) / PAGE_SIZE;
			if pages > 0 {
				let res = self.map(
					begin,
					pages,
					PROT_READ | PROT_WRITE,
					RegionType::Data,
					MAP_PRIVATE | MAP_ANONYMOUS | MAP_FIXED,
					None,
					0,
					0,
					false,
				);
				if res.is_err() {
					return old;
				}
			}
		} else {
			if addr < self.state.lock().brk_init {
				return old;
			}
			let begin = addr.align_to(PAGE_SIZE);
			let pages = (old.align_to(PAGE_SIZE).0 - begin.0) / PAGE_SIZE;
			if pages > 0 && self.unmap(begin, pages).is_err() {
				return old;
			}
		}
		self.state.lock().brk = addr;
		addr
	}

	/// Moves or resizes the region at `old_addr`.
	///
	/// The function returns the new address of the region.
	pub fn remap(
		&self,
		old_addr: VirtAddr,
		old_pages: usize,
		new_pages: usize,
		may_move: bool,
	) -> EResult<VirtAddr> {
		if unlikely(!old_addr.is_aligned_to(PAGE_SIZE) || old_pages == 0 || new_pages == 0) {
			return Err(errno!(EINVAL));
		}
		let mut state = self.state.lock();
		let i = state.containing(old_addr).ok_or_else(|| errno!(EFAULT))?;
		let r = &state.regions[i];
		if r.addr != old_addr || r.pages != old_pages {
			return Err(errno!(EINVAL));
		}
		if new_pages <= old_pages {
			// Shrink: unmap the tail
			let vmem = self.vmem.lock();
			let tail = old_addr + new_pages * PAGE_SIZE;
			Self::detach_pages(&vmem, tail, old_pages - new_pages);
			state.regions[i].pages = new_pages;
			return Ok(old_addr);
		}
		// Grow in place when the range after the region is free
		let tail = old_addr + old_pages * PAGE_SIZE;
		let extra = new_pages - old_pages;
		if !state.overlaps(tail, extra) && tail + extra * PAGE_SIZE <= USER_MEM_END {
			state.regions[i].pages = new_pages;
			return Ok(old_addr);
		}
		if !may_move {
			return Err(errno!(ENOMEM));
		}
		// Move: pick a new range and transplant the page table entries
		let new_addr = state.find_free(VirtAddr::default(), new_pages)?;
		let vmem = self.vmem.lock();
		for p in 0..old_pages {
			if let Some((phys, flags)) = vmem.entry(old_addr + p * PAGE_SIZE) {
				vmem.map(phys, new_addr + p * PAGE_SIZE, flags)?;
				vmem.unmap(old_addr + p * PAGE_SIZE);
			}
		}
		let mut r = state.regions.remove(i);
		r.addr = new_addr;
		r.pages = new_pages;
		state.insert(r)?;
		Ok(new_addr)
	}
}

impl Drop for MemSpace {
	fn drop(&mut self) {
		// The context of an exiting process may still be bound: switch back to the kernel's
		if self.vmem.lock().is_bound() {
			vmem::KERNEL_VMEM.get().lock().bind();
		}
		self.clear();
	}
}

#[cfg(test)]
mod test;
