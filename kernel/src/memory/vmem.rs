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

//! Virtual memory contexts.
//!
//! A [`VMem`] wraps an architecture-specific paging structure and implements the operations the
//! rest of the kernel needs in an architecture-independent way.

use crate::{
	arch::x86::paging,
	boot::MEMORY_AVAILABLE,
	memory::{PhysAddr, VirtAddr, KERNEL_BEGIN},
	sync::{mutex::Mutex, once::OnceInit},
};
use core::ptr::NonNull;
use utils::{errno::AllocResult, limits::PAGE_SIZE};

/// A virtual memory context.
#[derive(Debug)]
pub struct VMem {
	/// The root paging object.
	table: NonNull<paging::Table>,
}

unsafe impl Send for VMem {}

impl VMem {
	/// Creates a new virtual memory context, with the kernel half linked in.
	pub fn new() -> AllocResult<Self> {
		Ok(Self {
			table: paging::alloc()?,
		})
	}

	/// Returns a reference to the architecture-dependent inner representation.
	pub fn inner(&self) -> &paging::Table {
		unsafe { self.table.as_ref() }
	}

	/// Translates the virtual address `addr` to the corresponding physical address.
	///
	/// If the address is not mapped, the function returns `None`.
	pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
		paging::translate(self.inner(), addr)
	}

	/// Returns the physical address and flags of the leaf entry mapping `addr`.
	pub fn entry(&self, addr: VirtAddr) -> Option<(PhysAddr, usize)> {
		paging::get_entry_value(self.inner(), addr)
	}

	/// Maps a single page of virtual memory at `virtaddr` to the page of physical memory at
	/// `physaddr`, then invalidates the TLB entry.
	pub fn map(&self, physaddr: PhysAddr, virtaddr: VirtAddr, flags: usize) -> AllocResult<()> {
		unsafe {
			paging::map(self.inner(), physaddr, virtaddr, flags, 0)?;
		}
		invalidate_page(virtaddr);
		Ok(())
	}

	/// Like [`Self::map`] but on a range of `pages` pages.
	pub fn map_range(
		&self,
		physaddr: PhysAddr,
		virtaddr: VirtAddr,
		pages: usize,
		flags: usize,
	) -> AllocResult<()> {
		unsafe {
			paging::map_range(self.inner(), physaddr, virtaddr, pages, flags)?;
		}
		invalidate_range(virtaddr, pages);
		Ok(())
	}

	/// Unmaps a single page of virtual memory at `virtaddr`.
	///
	/// The physical frame is **not** freed.
	pub fn unmap(&self, virtaddr: VirtAddr) {
		unsafe {
			paging::unmap(self.inner(), virtaddr);
		}
		invalidate_page(virtaddr);
	}

	/// Like [`Self::unmap`] but on a range of `pages` pages.
	pub fn unmap_range(&self, virtaddr: VirtAddr, pages: usize) {
		for i in 0..pages {
			unsafe {
				paging::unmap(self.inner(), virtaddr + i * PAGE_SIZE);
			}
		}
		invalidate_range(virtaddr, pages);
	}

	/// Polls and clears the dirty bit of the page at `addr`.
	pub fn poll_dirty(&self, addr: VirtAddr) -> Option<(PhysAddr, bool)> {
		paging::poll_dirty(self.inner(), addr)
	}

	/// Clones the user half of the context for process forking.
	///
	/// Writable private pages are turned Copy-On-Write on **both** sides and every copied page
	/// gets its share counter incremented. On failure, the partially built context is freed and
	/// no side effect remains on `self` apart from pages already turned COW, which is harmless.
	pub fn fork(&self) -> AllocResult<Self> {
		let child = Self::new()?;
		paging::fork_user(self.inner(), child.inner())?;
		// The parent lost write access on COW pages
		if self.is_bound() {
			flush();
		}
		Ok(child)
	}

	/// Frees every user page of the context, share-count aware, along with the now-empty page
	/// tables.
	pub fn unmap_user_all(&self) {
		unsafe {
			paging::free_user(self.inner());
		}
		if self.is_bound() {
			flush();
		}
	}

	/// Binds the virtual memory context to the current CPU.
	pub fn bind(&self) {
		let phys_addr = VirtAddr::from(self.table).kernel_to_physical().unwrap();
		unsafe {
			paging::bind(phys_addr);
		}
	}

	/// Tells whether the context is bound to the current CPU.
	pub fn is_bound(&self) -> bool {
		paging::is_bound(self.table)
	}
}

impl Drop for VMem {
	fn drop(&mut self) {
		if self.is_bound() {
			panic!("dropping a virtual memory context while in use");
		}
		unsafe {
			paging::free(self.table);
		}
	}
}

/// Invalidates the page at the given address on the current CPU.
#[inline]
pub fn invalidate_page(addr: VirtAddr) {
	paging::invlpg(addr);
}

/// Invalidates the range of `count` pages starting at `addr` on the current CPU.
pub fn invalidate_range(addr: VirtAddr, count: usize) {
	for i in 0..count {
		invalidate_page(addr + i * PAGE_SIZE);
	}
}

/// Flushes the Translation Lookaside Buffer on the current CPU.
#[inline]
pub fn flush() {
	paging::flush();
}

/// Executes the closure while allowing the kernel to write on read-only pages.
///
/// # Safety
///
/// This function disables memory protection on the kernel side. Writing on some read-only
/// regions (code for example) is dangerous.
#[inline]
pub unsafe fn write_ro<F: FnOnce() -> T, T>(f: F) -> T {
	let prev = crate::arch::x86::set_write_protected(false);
	let res = f();
	crate::arch::x86::set_write_protected(prev);
	res
}

/// The kernel's own virtual memory context.
pub static KERNEL_VMEM: OnceInit<Mutex<VMem>> = unsafe { OnceInit::new() };

/// Initializes virtual memory management: builds the kernel context, with the whole physical
/// memory mapped at [`KERNEL_BEGIN`], and binds it.
pub(crate) fn init() {
	let kernel_vmem = VMem::new().expect("cannot allocate the kernel virtual memory context");
	let boot_info = crate::boot::info();
	for entry in boot_info.memmap.iter() {
		if entry.type_ != MEMORY_AVAILABLE {
			continue;
		}
		let virt = KERNEL_BEGIN + entry.addr.0;
		let pages = (entry.len as usize).div_ceil(PAGE_SIZE);
		kernel_vmem
			.map_range(
				entry.addr,
				virt,
				pages,
				paging::FLAG_WRITE | paging::FLAG_GLOBAL,
			)
			.expect("cannot map the physical memory");
	}
	kernel_vmem.bind();
	paging::set_kernel_root(kernel_vmem.table);
	unsafe {
		OnceInit::init(&KERNEL_VMEM, Mutex::new(kernel_vmem));
	}
}
