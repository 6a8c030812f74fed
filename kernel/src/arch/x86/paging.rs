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

//! x86-64 virtual memory support.
//!
//! The address space is mapped by 4 levels of tables (PML4, PDPT, PD, PT). The higher half of the
//! PML4 (entries 256 and above) belongs to the kernel and is shared by every context.

use crate::{memory, memory::{frame, PhysAddr, VirtAddr}, register_get};
use core::{
	arch::asm,
	mem,
	ops::{Deref, DerefMut},
	ptr::NonNull,
	sync::atomic::{
		AtomicUsize,
		Ordering::{Acquire, Relaxed},
	},
};
use utils::{errno::{AllocError, AllocResult}, limits::PAGE_SIZE};

/// Paging entry.
pub type Entry = AtomicUsize;

/// **x86 paging flag**: If set, the page is present.
pub const FLAG_PRESENT: usize = 1 << 0;
/// **x86 paging flag**: If set, the page can be written.
pub const FLAG_WRITE: usize = 1 << 1;
/// **x86 paging flag**: If set, the page can be accessed by userspace operations.
pub const FLAG_USER: usize = 1 << 2;
/// **x86 paging flag**: If set, write-through caching is enabled.
pub const FLAG_WRITE_THROUGH: usize = 1 << 3;
/// **x86 paging flag**: If set, the page will not be cached.
pub const FLAG_CACHE_DISABLE: usize = 1 << 4;
/// **x86 paging flag**: Set if the page has been read or written.
pub const FLAG_ACCESSED: usize = 1 << 5;
/// **x86 paging flag**: Indicates that the page has been written.
pub const FLAG_DIRTY: usize = 1 << 6;
/// **x86 paging flag**: If set, pages are 2 MB (or 1 GB) long.
pub const FLAG_PAGE_SIZE: usize = 1 << 7;
/// **x86 paging flag**: If set, the TLB entry is not invalidated on context switch.
pub const FLAG_GLOBAL: usize = 1 << 8;
/// **Software flag**: the page is pending Copy-On-Write.
///
/// A COW page is always mapped read-only: [`FLAG_WRITE`] and [`FLAG_COW`] are mutually
/// exclusive.
pub const FLAG_COW: usize = 1 << 9;
/// **Software flag**: the page belongs to a private mapping.
pub const FLAG_PRIVATE: usize = 1 << 10;
/// **x86 paging flag**: If set, execution of instructions is disabled.
pub const FLAG_XD: usize = 1 << 63;

/// Flags mask in a page directory entry.
pub const FLAGS_MASK: usize = FLAG_XD | 0xfff;
/// Address mask in a page directory entry.
pub const ADDR_MASK: usize = !FLAGS_MASK;

/// x86 page fault flag. If set, the page was present.
pub const PAGE_FAULT_PRESENT: u32 = 0b00001;
/// x86 page fault flag. If set, the error was caused by a write operation.
pub const PAGE_FAULT_WRITE: u32 = 0b00010;
/// x86 page fault flag. If set, the page fault was caused by a userspace operation.
pub const PAGE_FAULT_USER: u32 = 0b00100;
/// x86 page fault flag. If set, the page fault was caused by an instruction fetch.
pub const PAGE_FAULT_INSTRUCTION: u32 = 0b10000;

/// The number of entries in a table.
pub const ENTRIES_PER_TABLE: usize = 512;
/// The paging depth.
pub const DEPTH: usize = 4;

/// The number of PML4 entries reserved for userspace. The remaining entries belong to the
/// kernel and are shared across all contexts.
pub const USERSPACE_TABLES: usize = 256;
/// The number of PML4 entries reserved for the kernelspace.
const KERNELSPACE_TABLES: usize = ENTRIES_PER_TABLE - USERSPACE_TABLES;
/// Kernel space entries flags.
const KERNEL_FLAGS: usize = FLAG_PRESENT | FLAG_WRITE | FLAG_GLOBAL;

/// The number of frames currently allocated for page tables.
pub static TABLE_FRAMES: AtomicUsize = AtomicUsize::new(0);

/// A paging table.
#[repr(C, align(4096))]
pub struct Table(pub [Entry; ENTRIES_PER_TABLE]);

impl Table {
	/// Creates a new zeroed table.
	pub const fn new() -> Self {
		Self(unsafe { mem::zeroed() })
	}

	/// Tells whether the table contains no present entry.
	pub fn is_empty(&self) -> bool {
		self.iter().all(|e| e.load(Relaxed) & FLAG_PRESENT == 0)
	}
}

impl Default for Table {
	fn default() -> Self {
		Self::new()
	}
}

impl Deref for Table {
	type Target = [Entry; ENTRIES_PER_TABLE];

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DerefMut for Table {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

/// Kernel space paging tables common to every context.
static KERNEL_TABLES: [Table; KERNELSPACE_TABLES] = unsafe { mem::zeroed() };

/// Allocates a zeroed table and returns its virtual address.
fn alloc_table() -> AllocResult<NonNull<Table>> {
	let phys = frame::alloc_frame()?;
	TABLE_FRAMES.fetch_add(1, Relaxed);
	let virt = phys.kernel_to_virtual().unwrap();
	let mut table = NonNull::new(virt.as_ptr::<Table>()).ok_or(AllocError)?;
	unsafe {
		table.as_mut().fill_with(Entry::default);
	}
	Ok(table)
}

/// Frees a table.
///
/// # Safety
///
/// Further accesses to the table are undefined.
unsafe fn free_table(table: NonNull<Table>) {
	let phys = VirtAddr::from(table).kernel_to_physical().unwrap();
	frame::free_frame(phys);
	TABLE_FRAMES.fetch_sub(1, Relaxed);
}

/// Turns an address/flags pair into an entry.
///
/// [`FLAG_PRESENT`] is inserted automatically.
#[inline]
fn to_entry(addr: PhysAddr, flags: usize) -> usize {
	debug_assert!(flags & FLAG_WRITE == 0 || flags & FLAG_COW == 0);
	addr.0 | (flags & FLAGS_MASK) | FLAG_PRESENT
}

/// Turns an entry back into a table/flags pair.
///
/// # Safety
///
/// If the address in the entry is invalid, the behaviour is undefined.
#[inline]
unsafe fn unwrap_entry(entry: usize) -> (NonNull<Table>, usize) {
	let table = PhysAddr(entry & ADDR_MASK)
		.kernel_to_virtual()
		.unwrap()
		.as_ptr();
	(NonNull::new(table).unwrap(), entry & FLAGS_MASK)
}

/// Allocates and initializes a paging context.
///
/// The kernel half is linked into the context.
pub fn alloc() -> AllocResult<NonNull<Table>> {
	let mut ctx = alloc_table()?;
	let ctx_ref = unsafe { ctx.as_mut() };
	KERNEL_TABLES
		.iter()
		.zip(ctx_ref[USERSPACE_TABLES..].iter_mut())
		.for_each(|(src, dst)| {
			let addr = VirtAddr::from(src as *const Table)
				.kernel_to_physical()
				.unwrap();
			*dst.get_mut() = to_entry(addr, KERNEL_FLAGS);
		});
	Ok(ctx)
}

/// Returns the index of the entry for virtual address `addr` at depth `level`.
///
/// `0` is the deepest level (page tables).
#[inline]
fn get_addr_element_index(addr: VirtAddr, level: usize) -> usize {
	(addr.0 >> (12 + level * 9)) & 0x1ff
}

/// Walks to the leaf entry mapping `addr`.
///
/// If `create` is set, missing intermediate tables are allocated, zero-filled before install.
/// Otherwise, the function returns `None` when the walk hits a missing table.
pub fn get_entry(mut table: &Table, addr: VirtAddr, create: bool) -> AllocResult<Option<&Entry>> {
	for level in (1..DEPTH).rev() {
		let ent = &table[get_addr_element_index(addr, level)];
		let val = ent.load(Acquire);
		if val & FLAG_PRESENT == 0 {
			if !create {
				return Ok(None);
			}
			// Install a fresh, zeroed table
			let new_table = alloc_table()?;
			let phys = VirtAddr::from(new_table).kernel_to_physical().unwrap();
			let flags = if addr < memory::KERNEL_BEGIN {
				FLAG_WRITE | FLAG_USER
			} else {
				FLAG_WRITE
			};
			ent.store(to_entry(phys, flags), Relaxed);
		}
		let val = ent.load(Acquire);
		table = unsafe { unwrap_entry(val).0.as_ref() };
	}
	Ok(Some(&table[get_addr_element_index(addr, 0)]))
}

fn translate_impl(mut table: &Table, addr: VirtAddr) -> Option<usize> {
	for level in (0..DEPTH).rev() {
		let index = get_addr_element_index(addr, level);
		let entry = table[index].load(Relaxed);
		if entry & FLAG_PRESENT == 0 {
			break;
		}
		if level == 0 || entry & FLAG_PAGE_SIZE != 0 {
			return Some(entry);
		}
		table = unsafe { unwrap_entry(entry).0.as_ref() };
	}
	None
}

/// Translates the virtual address `addr` to the corresponding physical address.
pub fn translate(table: &Table, addr: VirtAddr) -> Option<PhysAddr> {
	let entry = translate_impl(table, addr)?;
	let remain_mask = if entry & FLAG_PAGE_SIZE == 0 {
		PAGE_SIZE - 1
	} else {
		ENTRIES_PER_TABLE * PAGE_SIZE - 1
	};
	Some(PhysAddr((entry & ADDR_MASK) | (addr.0 & remain_mask)))
}

/// Returns the leaf entry value mapping `addr`, with its flags.
pub fn get_entry_value(table: &Table, addr: VirtAddr) -> Option<(PhysAddr, usize)> {
	let entry = translate_impl(table, addr)?;
	Some((PhysAddr(entry & ADDR_MASK), entry & FLAGS_MASK))
}

const PAGE_SIZE_ORDER_1: u8 = 9;
const PAGE_SIZE_ORDER_2: u8 = 18;

/// Maps `physaddr` at `virtaddr` with the given flags.
///
/// The function returns the size of the mapped entry in bytes: when [`FLAG_PAGE_SIZE`] is
/// requested and `page_size_order` allows it, a single large entry covers several pages.
///
/// # Safety
///
/// In case the mapped memory is in kernelspace, the caller must ensure the code and stack of
/// the kernel remain accessible and valid.
pub unsafe fn map(
	mut table: &Table,
	physaddr: PhysAddr,
	virtaddr: VirtAddr,
	flags: usize,
	page_size_order: u8,
) -> AllocResult<usize> {
	for level in (0..DEPTH).rev() {
		let ent = &table[get_addr_element_index(virtaddr, level)];
		match (level, flags & FLAG_PAGE_SIZE != 0, page_size_order) {
			(0, ..) => {
				ent.store(to_entry(physaddr, flags & !FLAG_PAGE_SIZE), Relaxed);
				return Ok(PAGE_SIZE);
			}
			(1, true, PAGE_SIZE_ORDER_1..) => {
				ent.store(to_entry(physaddr, flags), Relaxed);
				return Ok(PAGE_SIZE << PAGE_SIZE_ORDER_1);
			}
			(2, true, PAGE_SIZE_ORDER_2..) => {
				ent.store(to_entry(physaddr, flags), Relaxed);
				return Ok(PAGE_SIZE << PAGE_SIZE_ORDER_2);
			}
			_ => {
				// FLAG_XD is inverted relative to other flags and FLAG_PAGE_SIZE is not
				// supported on intermediate entries
				let flags = flags & !(FLAG_XD | FLAG_PAGE_SIZE | FLAG_COW | FLAG_PRIVATE);
				let val = ent.load(Relaxed);
				if val & FLAG_PRESENT == 0 {
					let new_table = alloc_table()?;
					let addr = VirtAddr::from(new_table).kernel_to_physical().unwrap();
					ent.store(to_entry(addr, flags), Relaxed);
				} else {
					ent.fetch_or(flags, Relaxed);
				}
			}
		}
		let val = ent.load(Relaxed);
		table = unsafe { unwrap_entry(val).0.as_ref() };
	}
	unreachable!();
}

/// Like [`map`], on a range of `pages` pages, using large entries when alignment allows.
///
/// # Safety
///
/// See [`map`].
pub unsafe fn map_range(
	table: &Table,
	mut physaddr: PhysAddr,
	mut virtaddr: VirtAddr,
	pages: usize,
	flags: usize,
) -> AllocResult<()> {
	let end = virtaddr + pages * PAGE_SIZE;
	while virtaddr < end {
		// log2(PAGE_SIZE) = 12
		let align_order = (physaddr.0 | (end.0 - virtaddr.0)).trailing_zeros() as u8 - 12;
		let off = map(table, physaddr, virtaddr, flags | FLAG_PAGE_SIZE, align_order)?;
		physaddr = physaddr + off;
		virtaddr = virtaddr + off;
	}
	Ok(())
}

/// Unmaps the page of virtual memory at `virtaddr`, freeing page tables that become empty.
///
/// # Safety
///
/// In case the unmapped memory is in kernelspace, the caller must ensure the code and stack of
/// the kernel remain accessible and valid.
pub unsafe fn unmap(mut table: &Table, virtaddr: VirtAddr) {
	// Record the path to the leaf
	let mut tables: [Option<(NonNull<Table>, usize)>; DEPTH] = [None; DEPTH];
	for level in (0..DEPTH).rev() {
		let index = get_addr_element_index(virtaddr, level);
		let entry = table[index].load(Relaxed);
		tables[level] = Some((NonNull::from(table), index));
		if level == 0 || entry & FLAG_PRESENT == 0 || entry & FLAG_PAGE_SIZE != 0 {
			break;
		}
		table = unsafe { unwrap_entry(entry).0.as_ref() };
	}
	// Remove the entry, then walk back up removing tables that are now empty
	for (level, t) in tables.iter().enumerate() {
		let Some((mut table, index)) = *t else {
			continue;
		};
		let table = unsafe { table.as_mut() };
		table[index].store(0, Relaxed);
		if !table.is_empty() {
			break;
		}
		// The root holds the kernel half and the tables just below it on the kernel side are
		// static: both must survive
		let can_free = level < DEPTH - 2
			|| (level == DEPTH - 2 && virtaddr < crate::memory::KERNEL_BEGIN);
		if !can_free {
			break;
		}
		free_table(NonNull::from(&*table));
	}
}

/// The kernel's root paging table, registered at initialization.
static KERNEL_ROOT: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

/// Registers the kernel's root paging table, so that kernel mappings can be reached without
/// going through a virtual memory context.
pub(crate) fn set_kernel_root(table: NonNull<Table>) {
	KERNEL_ROOT.store(table.as_ptr() as usize, Relaxed);
}

/// Returns the kernel's root paging table.
///
/// Entries are atomic: the table can be used concurrently.
pub fn kernel_table() -> &'static Table {
	let ptr = KERNEL_ROOT.load(Relaxed);
	debug_assert!(ptr != 0);
	unsafe { &*(ptr as *const Table) }
}

/// Walks the user half of `src`, turning writable private mappings Copy-On-Write, and builds the
/// same mappings into `dst`.
///
/// Every copied page has its share counter incremented. On failure, the function frees the
/// partially built tree of `dst`, releasing the share counters that were taken.
pub fn fork_user(src: &Table, dst: &Table) -> AllocResult<()> {
	let res = fork_user_impl(src, dst, DEPTH - 1);
	if res.is_err() {
		unsafe {
			free_user(dst);
		}
	}
	res
}

fn fork_user_impl(src: &Table, dst: &Table, level: usize) -> AllocResult<()> {
	let max = if level == DEPTH - 1 {
		USERSPACE_TABLES
	} else {
		ENTRIES_PER_TABLE
	};
	for index in 0..max {
		let entry = src[index].load(Acquire);
		if entry & FLAG_PRESENT == 0 {
			continue;
		}
		if level == 0 {
			let mut entry = entry;
			// A writable private page becomes COW on both sides
			if entry & FLAG_PRIVATE != 0 && entry & FLAG_WRITE != 0 {
				entry = (entry & !FLAG_WRITE) | FLAG_COW;
				src[index].store(entry, Relaxed);
			}
			frame::inc_shares(PhysAddr(entry & ADDR_MASK));
			dst[index].store(entry, Relaxed);
		} else {
			let new_table = alloc_table()?;
			let phys = VirtAddr::from(new_table).kernel_to_physical().unwrap();
			dst[index].store(to_entry(phys, entry & FLAGS_MASK), Relaxed);
			let src_table = unsafe { unwrap_entry(entry).0.as_ref() };
			let dst_table = unsafe { new_table.as_ref() };
			fork_user_impl(src_table, dst_table, level - 1)?;
		}
	}
	Ok(())
}

/// Walks the user half of `table`, freeing every mapped frame (share-count aware) and the page
/// tables themselves.
///
/// The kernel half and the root table are left untouched.
///
/// # Safety
///
/// The context must not be bound on any CPU, except the current one.
pub unsafe fn free_user(table: &Table) {
	free_user_impl(table, DEPTH - 1);
}

unsafe fn free_user_impl(table: &Table, level: usize) {
	let max = if level == DEPTH - 1 {
		USERSPACE_TABLES
	} else {
		ENTRIES_PER_TABLE
	};
	for index in 0..max {
		let entry = table[index].load(Relaxed);
		if entry & FLAG_PRESENT == 0 {
			continue;
		}
		if level == 0 {
			frame::free_frame(PhysAddr(entry & ADDR_MASK));
		} else {
			let (sub, _) = unwrap_entry(entry);
			free_user_impl(sub.as_ref(), level - 1);
			free_table(sub);
		}
		table[index].store(0, Relaxed);
	}
}

/// Polls and clears the dirty bit of the page at `virtaddr`.
///
/// The function returns the physical address of the page and whether it was dirty. If the page
/// is not mapped, the function returns `None`.
pub fn poll_dirty(table: &Table, virtaddr: VirtAddr) -> Option<(PhysAddr, bool)> {
	let mut table = table;
	for level in (1..DEPTH).rev() {
		let entry = table[get_addr_element_index(virtaddr, level)].load(Relaxed);
		if entry & FLAG_PRESENT == 0 {
			return None;
		}
		table = unsafe { unwrap_entry(entry).0.as_ref() };
	}
	let ent = &table[get_addr_element_index(virtaddr, 0)];
	let prev = ent.fetch_and(!FLAG_DIRTY, Relaxed);
	if prev & FLAG_PRESENT == 0 {
		return None;
	}
	Some((PhysAddr(prev & ADDR_MASK), prev & FLAG_DIRTY != 0))
}

/// Binds the given paging context to the current CPU.
///
/// # Safety
///
/// The caller must ensure the given context maps the kernel's code and data sections, and any
/// memory that might be accessed in the future.
#[inline]
pub unsafe fn bind(ctx: PhysAddr) {
	asm!(
		"mov cr3, {dir}",
		dir = in(reg) ctx.0
	)
}

/// Tells whether the given paging context is bound on the current CPU.
#[inline]
pub fn is_bound(ctx: NonNull<Table>) -> bool {
	let physaddr = VirtAddr::from(ctx).kernel_to_physical().unwrap();
	let cr3 = unsafe { register_get!("cr3") };
	cr3 == physaddr.0
}

/// Invalidates the TLB entry at the given address on the current CPU.
#[inline]
pub fn invlpg(addr: VirtAddr) {
	unsafe {
		asm!("invlpg [{addr}]", addr = in(reg) addr.0, options(nostack));
	}
}

/// Flushes the whole Translation Lookaside Buffer on the current CPU.
///
/// This is an expensive operation and should be used as little as possible.
#[inline]
pub fn flush() {
	unsafe {
		asm!(
			"mov {tmp}, cr3",
			"mov cr3, {tmp}",
			tmp = out(reg) _
		);
	}
}

/// Destroys the given paging context, freeing the user half and the root table.
///
/// # Safety
///
/// The context must not be in use. Subsequent uses of `ctx` are undefined.
pub unsafe fn free(ctx: NonNull<Table>) {
	free_user(ctx.as_ref());
	free_table(ctx);
}
