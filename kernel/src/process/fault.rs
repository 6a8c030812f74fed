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

//! CPU fault handling: exceptions concerning a userspace task become signals.

use crate::{
	memory::VirtAddr,
	process::{
		signal::{SigInfo, Signal},
		Process,
	},
};

/// Handles a CPU exception.
///
/// Arguments:
/// - `id` is the exception vector
/// - `code` is the error code, if the exception pushes one
/// - `rip` is the faulting instruction pointer
/// - `user` tells whether the exception was raised from userspace
pub fn exception(id: u32, code: Option<u32>, rip: usize, user: bool) {
	if !user {
		panic!("kernel exception {id:#x} (code: {code:?}) at {rip:#x}");
	}
	let proc = Process::current();
	let sig = match id {
		// Divide-by-zero and floating point errors
		0x00 | 0x10 | 0x13 => Signal::SIGFPE,
		// Breakpoint
		0x03 => Signal::SIGTRAP,
		// Invalid opcode
		0x06 => Signal::SIGILL,
		// General protection fault
		0x0d => Signal::SIGSEGV,
		// Alignment check
		0x11 => Signal::SIGBUS,
		_ => Signal::SIGSEGV,
	};
	proc.set_siginfo(SigInfo {
		signo: sig.id(),
		code: code.unwrap_or(0),
		addr: VirtAddr(rip),
	});
	proc.kill(sig);
}

/// Handles a page fault.
///
/// The fault is first submitted to the memory space of the current process, which resolves
/// lazy allocations and Copy-On-Write. An unresolved fault from userspace becomes `SIGSEGV`;
/// from the kernel, it is fatal.
pub fn page_fault(addr: VirtAddr, code: u32, rip: usize, user: bool) {
	let resolved = {
		let proc = Process::current_opt();
		match proc.as_ref().and_then(|p| p.mem_space()) {
			Some(space) => space.handle_page_fault(addr, code).unwrap_or(false),
			None => false,
		}
	};
	if resolved {
		return;
	}
	if !user {
		panic!("kernel page fault at {addr:?} (code: {code:#x}, rip: {rip:#x})");
	}
	let proc = Process::current();
	proc.set_siginfo(SigInfo {
		signo: Signal::SIGSEGV.id(),
		code,
		addr,
	});
	proc.kill(Signal::SIGSEGV);
}
