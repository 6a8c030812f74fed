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

//! Memory space self-tests.

use super::*;

fn anon_map(space: &MemSpace, addr: VirtAddr, pages: usize, flags: u32) -> EResult<VirtAddr> {
	space.map(
		addr,
		pages,
		PROT_READ | PROT_WRITE,
		RegionType::Data,
		MAP_PRIVATE | flags,
		None,
		0,
		0,
		false,
	)
}

/// Checks the region list invariant: address-ordered, non-overlapping.
fn check_ordered(space: &MemSpace) {
	let state = space.state.lock();
	for pair in state.regions.windows(2) {
		assert!(pair[0].end() <= pair[1].addr);
	}
}

#[test_case]
fn mem_space_map_unmap() {
	let space = MemSpace::new().unwrap();
	let addr = anon_map(&space, VirtAddr::default(), 4, 0).unwrap();
	assert!(addr.is_aligned_to(PAGE_SIZE));
	assert_eq!(space.covered_pages(), 4);
	check_ordered(&space);
	// Unmapping the middle splits the region
	space.unmap(addr + PAGE_SIZE, 2).unwrap();
	assert_eq!(space.covered_pages(), 2);
	assert_eq!(space.region_count(), 2);
	check_ordered(&space);
	space.unmap(addr, 4).unwrap();
	assert_eq!(space.covered_pages(), 0);
}

#[test_case]
fn mem_space_fixed_overlap() {
	let space = MemSpace::new().unwrap();
	let addr = VirtAddr(0x20000000000);
	anon_map(&space, addr, 4, MAP_FIXED).unwrap();
	// Overlap without permission fails
	let res = space.map(
		addr + PAGE_SIZE,
		1,
		PROT_READ,
		RegionType::Data,
		MAP_PRIVATE | MAP_FIXED,
		None,
		0,
		0,
		false,
	);
	assert_eq!(res, Err(errno!(EEXIST)));
	// Overlap with permission replaces the covered pages
	space
		.map(
			addr + PAGE_SIZE,
			1,
			PROT_READ,
			RegionType::Data,
			MAP_PRIVATE | MAP_FIXED,
			None,
			0,
			0,
			true,
		)
		.unwrap();
	assert_eq!(space.covered_pages(), 4);
	check_ordered(&space);
}

#[test_case]
fn mem_space_map_boundary() {
	let space = MemSpace::new().unwrap();
	// Last page of userspace is usable
	let last = VirtAddr(USER_MEM_END.0 - PAGE_SIZE);
	anon_map(&space, last, 1, MAP_FIXED).unwrap();
	// One page past the end is not
	let res = anon_map(&space, last, 2, MAP_FIXED);
	assert!(res.is_err());
}

#[test_case]
fn mem_space_consolidate() {
	let space = MemSpace::new().unwrap();
	let addr = VirtAddr(0x30000000000);
	anon_map(&space, addr, 2, MAP_FIXED).unwrap();
	anon_map(&space, addr + 2 * PAGE_SIZE, 3, MAP_FIXED).unwrap();
	space.consolidate();
	assert_eq!(space.region_count(), 1);
	assert_eq!(space.covered_pages(), 5);
	// A differing protection prevents the merge
	anon_map(&space, addr + 8 * PAGE_SIZE, 1, MAP_FIXED).unwrap();
	space
		.set_prot(addr + 8 * PAGE_SIZE, 1, PROT_READ)
		.unwrap();
	anon_map(&space, addr + 9 * PAGE_SIZE, 1, MAP_FIXED).unwrap();
	space.consolidate();
	assert_eq!(space.region_count(), 3);
}

#[test_case]
fn mem_space_prot_idempotent() {
	let space = MemSpace::new().unwrap();
	let addr = anon_map(&space, VirtAddr::default(), 4, 0).unwrap();
	space.set_prot(addr + PAGE_SIZE, 2, PROT_READ).unwrap();
	let count = space.region_count();
	let covered = space.covered_pages();
	// Applying the same protection again must not change the state
	space.set_prot(addr + PAGE_SIZE, 2, PROT_READ).unwrap();
	assert_eq!(space.region_count(), count);
	assert_eq!(space.covered_pages(), covered);
	check_ordered(&space);
}

#[test_case]
fn mem_space_populate_and_cow_fork() {
	let parent = MemSpace::new().unwrap();
	let addr = anon_map(&parent, VirtAddr::default(), 1, 0).unwrap();
	// Populate the page for writing
	parent.populate(addr, PAGE_SIZE, true).unwrap();
	let (phys, flags) = {
		let vmem = parent.vmem.lock();
		vmem.entry(addr).unwrap()
	};
	assert!(flags & paging::FLAG_WRITE != 0);
	assert_eq!(frame::shares(phys), 0);
	// Fork: both sides see the same frame, read-only with the COW bit
	let child = parent.fork().unwrap();
	let (p_phys, p_flags) = parent.vmem.lock().entry(addr).unwrap();
	let (c_phys, c_flags) = child.vmem.lock().entry(addr).unwrap();
	assert_eq!(p_phys, c_phys);
	assert_eq!(p_phys, phys);
	for flags in [p_flags, c_flags] {
		assert!(flags & paging::FLAG_WRITE == 0);
		assert!(flags & paging::FLAG_COW != 0);
	}
	assert_eq!(frame::shares(phys), 1);
	// Resolving the write fault on the parent copies the page
	let free_before = frame::free_count();
	parent
		.handle_page_fault(addr, paging::PAGE_FAULT_WRITE | paging::PAGE_FAULT_PRESENT)
		.unwrap();
	let (new_phys, new_flags) = parent.vmem.lock().entry(addr).unwrap();
	assert_ne!(new_phys, phys);
	assert!(new_flags & paging::FLAG_WRITE != 0);
	assert!(new_flags & paging::FLAG_COW == 0);
	// Exactly one frame was consumed, and the child's frame is now exclusive
	assert_eq!(frame::free_count(), free_before - 1);
	assert_eq!(frame::shares(phys), 0);
	// The child, now sole owner, just regains write access on fault
	child
		.handle_page_fault(addr, paging::PAGE_FAULT_WRITE | paging::PAGE_FAULT_PRESENT)
		.unwrap();
	let (c_phys2, c_flags2) = child.vmem.lock().entry(addr).unwrap();
	assert_eq!(c_phys2, phys);
	assert!(c_flags2 & paging::FLAG_WRITE != 0);
}

#[test_case]
fn mem_space_remap() {
	let space = MemSpace::new().unwrap();
	let addr = anon_map(&space, VirtAddr::default(), 2, 0).unwrap();
	// Grow in place
	let new_addr = space.remap(addr, 2, 4, false).unwrap();
	assert_eq!(new_addr, addr);
	assert_eq!(space.covered_pages(), 4);
	// Shrink
	let new_addr = space.remap(addr, 4, 1, false).unwrap();
	assert_eq!(new_addr, addr);
	assert_eq!(space.covered_pages(), 1);
	check_ordered(&space);
}
