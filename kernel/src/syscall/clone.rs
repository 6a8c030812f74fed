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

//! The `clone` system call creates a child process, sharing the parts of the context selected
//! by its flags.

use crate::{
	memory::VirtAddr,
	process::{ForkOptions, Process},
};
use utils::errno::EResult;

/// Clone flag: share the memory space.
const CLONE_VM: usize = 0x100;
/// Clone flag: share the file descriptor table.
const CLONE_FILES: usize = 0x400;
/// Clone flag: share the signal dispositions.
const CLONE_SIGHAND: usize = 0x800;
/// Clone flag: the child is placed in the parent's thread group.
const CLONE_THREAD: usize = 0x10000;
/// Clone flag: suspend the parent until the child exits or executes a program.
const CLONE_VFORK: usize = 0x4000;

/// Creates a child process with fine-grained sharing of the parent's context.
pub fn clone(flags: usize, stack: VirtAddr) -> EResult<usize> {
	let proc = Process::current();
	let child = proc.fork(ForkOptions {
		share_memory: flags & (CLONE_VM | CLONE_THREAD) != 0,
		share_fd: flags & CLONE_FILES != 0,
		share_sighand: flags & CLONE_SIGHAND != 0,
		vfork: flags & CLONE_VFORK != 0,
	})?;
	{
		let mut regs = child.regs.lock();
		regs.set_syscall_return(0);
		// A thread starts on its own stack
		if !stack.is_null() {
			regs.rsp = stack.0;
		}
	}
	Ok(child.pid as usize)
}
