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

//! Context switching.

use crate::process::{regs::Regs, Process};
use core::arch::{asm, naked_asm};
use utils::ptr::arc::Arc;

/// The callee-saved context of a suspended task, at the top of its kernel stack.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelContext {
	/// Callee-saved register.
	pub r15: usize,
	/// Callee-saved register.
	pub r14: usize,
	/// Callee-saved register.
	pub r13: usize,
	/// Callee-saved register.
	pub r12: usize,
	/// Callee-saved register.
	pub rbp: usize,
	/// Callee-saved register.
	pub rbx: usize,
	/// The address execution resumes at.
	pub rip: usize,
}

/// Saves the callee-saved context of the current task on its kernel stack and restores the
/// context of the next task.
///
/// `prev_sp` receives the stack pointer of the suspended task; `next_sp` is the saved stack
/// pointer of the resumed task.
#[unsafe(naked)]
unsafe extern "C" fn switch_context(prev_sp: *mut usize, next_sp: usize) {
	naked_asm!(
		"push rbx",
		"push rbp",
		"push r12",
		"push r13",
		"push r14",
		"push r15",
		"mov [rdi], rsp",
		"mov rsp, rsi",
		"pop r15",
		"pop r14",
		"pop r13",
		"pop r12",
		"pop rbp",
		"pop rbx",
		"ret",
	);
}

/// Switches from `prev` to `next`.
///
/// The memory space of `next` is bound before the stacks are exchanged.
pub(super) fn switch_to(prev: Option<Arc<Process>>, next: Arc<Process>) {
	if let Some(space) = next.mem_space() {
		if !space.is_bound() {
			space.bind();
		}
	}
	let next_sp = next.kernel_sp();
	let prev_sp = match &prev {
		Some(prev) => prev.kernel_sp_mut(),
		// The boot context has no task: park its stack pointer in a scratch slot
		None => {
			static mut BOOT_SP: usize = 0;
			core::ptr::addr_of_mut!(BOOT_SP)
		}
	};
	drop(prev);
	unsafe {
		switch_context(prev_sp, next_sp);
	}
}

/// Restores the given userspace register state and returns to userspace with `iretq`.
///
/// # Safety
///
/// `regs` must hold a valid userspace execution state.
pub unsafe fn iret_to_user(regs: &Regs) -> ! {
	// Userspace segment selectors: code 0x23, data 0x1b (ring 3)
	asm!(
		"mov rbx, [rdi + 8]",
		"mov rcx, [rdi + 16]",
		"mov rdx, [rdi + 24]",
		"mov rsi, [rdi + 32]",
		"mov rbp, [rdi + 48]",
		"mov r8, [rdi + 56]",
		"mov r9, [rdi + 64]",
		"mov r10, [rdi + 72]",
		"mov r11, [rdi + 80]",
		"mov r12, [rdi + 88]",
		"mov r13, [rdi + 96]",
		"mov r14, [rdi + 104]",
		"mov r15, [rdi + 112]",
		// Build the iretq frame: ss, rsp, rflags, cs, rip
		"push 0x1b",
		"push [rdi + 136]",
		"push [rdi + 128]",
		"push 0x23",
		"push [rdi + 120]",
		"mov rax, [rdi + 0]",
		"mov rdi, [rdi + 40]",
		"iretq",
		in("rdi") regs as *const Regs,
		options(noreturn)
	);
}
