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

//! The register snapshot of a task.

/// The state of the general purpose registers of a task, saved on kernel entry and restored
/// when returning to userspace.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct Regs {
	/// General purpose register.
	pub rax: usize,
	/// General purpose register.
	pub rbx: usize,
	/// General purpose register.
	pub rcx: usize,
	/// General purpose register.
	pub rdx: usize,
	/// General purpose register.
	pub rsi: usize,
	/// General purpose register.
	pub rdi: usize,
	/// General purpose register.
	pub rbp: usize,
	/// General purpose register.
	pub r8: usize,
	/// General purpose register.
	pub r9: usize,
	/// General purpose register.
	pub r10: usize,
	/// General purpose register.
	pub r11: usize,
	/// General purpose register.
	pub r12: usize,
	/// General purpose register.
	pub r13: usize,
	/// General purpose register.
	pub r14: usize,
	/// General purpose register.
	pub r15: usize,

	/// The instruction pointer.
	pub rip: usize,
	/// CPU flags.
	pub rflags: usize,
	/// The stack pointer.
	pub rsp: usize,
	/// The FS segment base, used for thread-local storage.
	pub fs_base: usize,
}

impl Regs {
	/// Returns the `n`th system call argument, following the x86-64 convention.
	pub fn syscall_arg(&self, n: u8) -> usize {
		match n {
			0 => self.rdi,
			1 => self.rsi,
			2 => self.rdx,
			3 => self.r10,
			4 => self.r8,
			5 => self.r9,
			_ => unreachable!(),
		}
	}

	/// Sets the return value of a system call.
	pub fn set_syscall_return(&mut self, value: usize) {
		self.rax = value;
	}
}
