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

//! The vDSO (virtual dynamic shared object) is a pair of kernel-provided pages mapped
//! read-only into each task, servicing `clock_gettime` without a context switch.
//!
//! Page 0 holds the code; page 1 holds the data:
//! - offset 0: the startup time, in seconds since the Unix epoch
//! - offset 16: the monotonic clock, as a timespec updated by the timer tick
//!
//! The code page is position independent: it finds the data page relative to its own address.

use crate::{
	memory::{frame, PhysAddr, VirtAddr},
	process::mem_space::{MemSpace, RegionType, MAP_PRIVATE, MAP_VDSO, PROT_EXEC, PROT_READ},
	sync::once::OnceInit,
	time,
};
use core::sync::atomic::{
	AtomicU64,
	Ordering::{Relaxed, Release},
};
use utils::{errno::EResult, limits::PAGE_SIZE, ptr::arc::Arc};

/// The offset of the startup time in the data page.
const DATA_OFF_STARTUP: usize = 0;
/// The offset of the monotonic timespec in the data page.
const DATA_OFF_MONOTONIC: usize = 16;

/// The vDSO `clock_gettime` implementation, hand-assembled.
///
/// ```text
/// ; rdi = clockid, rsi = *timespec
///     lea rax, [rip]          ; rax = address inside the code page
///     and rax, ~0xfff         ; rax = code page
///     add rax, 0x1000         ; rax = data page
///     cmp edi, 1              ; CLOCK_MONOTONIC?
///     je mono
///     cmp edi, 0              ; CLOCK_REALTIME?
///     je real
///     mov eax, 228            ; anything else: fall back to the system call
///     syscall
///     ret
/// mono:
///     mov rcx, [rax + 16]     ; seconds
///     mov rdx, [rax + 24]     ; nanoseconds
///     mov r8, [rax + 16]      ; re-read to detect a concurrent bump
///     cmp rcx, r8
///     jne mono
///     mov [rsi], rcx
///     mov [rsi + 8], rdx
///     xor eax, eax
///     ret
/// real:                       ; same, plus the startup epoch
///     mov rcx, [rax + 16]
///     mov rdx, [rax + 24]
///     mov r8, [rax + 16]
///     cmp rcx, r8
///     jne real
///     add rcx, [rax]
///     mov [rsi], rcx
///     mov [rsi + 8], rdx
///     xor eax, eax
///     ret
/// ```
#[rustfmt::skip]
static CLOCK_GETTIME_CODE: [u8; 94] = [
	0x48, 0x8d, 0x05, 0x00, 0x00, 0x00, 0x00,       // lea rax, [rip]
	0x48, 0x25, 0x00, 0xf0, 0xff, 0xff,             // and rax, 0xfffffffffffff000
	0x48, 0x05, 0x00, 0x10, 0x00, 0x00,             // add rax, 0x1000
	0x83, 0xff, 0x01,                               // cmp edi, 1
	0x74, 0x0d,                                     // je mono
	0x83, 0xff, 0x00,                               // cmp edi, 0
	0x74, 0x23,                                     // je real
	0xb8, 0xe4, 0x00, 0x00, 0x00,                   // mov eax, 228
	0x0f, 0x05,                                     // syscall
	0xc3,                                           // ret
	// mono:
	0x48, 0x8b, 0x48, 0x10,                         // mov rcx, [rax + 16]
	0x48, 0x8b, 0x50, 0x18,                         // mov rdx, [rax + 24]
	0x4c, 0x8b, 0x40, 0x10,                         // mov r8, [rax + 16]
	0x4c, 0x39, 0xc1,                               // cmp rcx, r8
	0x75, 0xef,                                     // jne mono
	0x48, 0x89, 0x0e,                               // mov [rsi], rcx
	0x48, 0x89, 0x56, 0x08,                         // mov [rsi + 8], rdx
	0x31, 0xc0,                                     // xor eax, eax
	0xc3,                                           // ret
	// real:
	0x48, 0x8b, 0x48, 0x10,                         // mov rcx, [rax + 16]
	0x48, 0x8b, 0x50, 0x18,                         // mov rdx, [rax + 24]
	0x4c, 0x8b, 0x40, 0x10,                         // mov r8, [rax + 16]
	0x4c, 0x39, 0xc1,                               // cmp rcx, r8
	0x75, 0xef,                                     // jne real
	0x48, 0x03, 0x08,                               // add rcx, [rax]
	0x48, 0x89, 0x0e,                               // mov [rsi], rcx
	0x48, 0x89, 0x56, 0x08,                         // mov [rsi + 8], rdx
	0x31, 0xc0,                                     // xor eax, eax
	0xc3,                                           // ret
];

/// The vDSO pages.
struct Vdso {
	/// The physical frame of the code page.
	code: PhysAddr,
	/// The physical frame of the data page.
	data: PhysAddr,
}

/// The loaded vDSO.
static VDSO: OnceInit<Vdso> = unsafe { OnceInit::new() };

/// Loads the vDSO pages at boot.
pub(crate) fn init() -> EResult<()> {
	let code = frame::alloc_frame()?;
	let data = frame::alloc_frame()?;
	unsafe {
		let code_ptr = code.kernel_to_virtual().unwrap().as_ptr::<u8>();
		core::ptr::write_bytes(code_ptr, 0xcc, PAGE_SIZE);
		core::ptr::copy_nonoverlapping(
			CLOCK_GETTIME_CODE.as_ptr(),
			code_ptr,
			CLOCK_GETTIME_CODE.len(),
		);
		let data_ptr = data.kernel_to_virtual().unwrap().as_ptr::<u8>();
		core::ptr::write_bytes(data_ptr, 0, PAGE_SIZE);
	}
	unsafe {
		OnceInit::init(
			&VDSO,
			Vdso {
				code,
				data,
			},
		);
	}
	update_time();
	Ok(())
}

/// Returns the atomic at the given offset of the data page.
fn data_word(off: usize) -> &'static AtomicU64 {
	let vdso = VDSO.get();
	let addr = vdso.data.kernel_to_virtual().unwrap() + off;
	unsafe { &*addr.as_ptr::<AtomicU64>() }
}

/// Publishes the current time to the data page. Called by the timer tick.
///
/// The nanoseconds are stored before the seconds, matching the userspace reader which
/// re-reads the seconds to detect a concurrent bump.
pub(crate) fn update_time() {
	if !VDSO.is_init() {
		return;
	}
	let mono = time::monotonic();
	data_word(DATA_OFF_STARTUP).store(time::startup_time(), Relaxed);
	data_word(DATA_OFF_MONOTONIC + 8).store(mono.tv_nsec as u64, Release);
	data_word(DATA_OFF_MONOTONIC).store(mono.tv_sec as u64, Release);
}

/// Maps the vDSO into the given memory space.
///
/// The code page is attached read-only, private, at a space-chosen address; the data page
/// follows at the next page. The function returns the address of the code page.
pub fn map(space: &Arc<MemSpace>) -> EResult<VirtAddr> {
	let vdso = VDSO.get();
	let addr = space.map(
		VirtAddr::default(),
		2,
		PROT_READ | PROT_EXEC,
		RegionType::Shmem,
		MAP_PRIVATE | MAP_VDSO,
		None,
		0,
		0,
		false,
	)?;
	space.attach_frame(addr, vdso.code, PROT_READ | PROT_EXEC, MAP_PRIVATE | MAP_VDSO)?;
	space.attach_frame(
		addr + PAGE_SIZE,
		vdso.data,
		PROT_READ,
		MAP_PRIVATE | MAP_VDSO,
	)?;
	Ok(addr)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::process::mem_space;

	#[test_case]
	fn vdso_data_layout() {
		if !VDSO.is_init() {
			init().unwrap();
		}
		update_time();
		let startup = data_word(DATA_OFF_STARTUP).load(Relaxed);
		assert_eq!(startup, time::startup_time());
		let sec = data_word(DATA_OFF_MONOTONIC).load(Relaxed);
		let mono = time::monotonic();
		assert!(mono.tv_sec as u64 >= sec);
	}

	#[test_case]
	fn vdso_map() {
		if !VDSO.is_init() {
			init().unwrap();
		}
		let space = MemSpace::new().unwrap();
		let addr = map(&space).unwrap();
		let region = space.region_at(addr).unwrap();
		assert_eq!(region.pages, 2);
		assert!(region.flags & MAP_VDSO != 0);
		assert_eq!(region.prot & mem_space::PROT_WRITE, 0);
		// Both pages are already present and point to the shared frames
		let vdso = VDSO.get();
		assert_eq!(
			space.translate(addr),
			Some(vdso.code)
		);
		assert_eq!(
			space.translate(addr + PAGE_SIZE),
			Some(vdso.data)
		);
	}
}
