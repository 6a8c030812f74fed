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

//! The `vfork` system call creates a child sharing the parent's memory space. The parent is
//! suspended until the child executes a program or exits.

use crate::process::{scheduler, ForkOptions, Process};
use utils::errno::EResult;

/// Creates a child process sharing the parent's memory space.
pub fn vfork() -> EResult<usize> {
	let proc = Process::current();
	let child = proc.fork(ForkOptions {
		vfork: true,
		..Default::default()
	})?;
	child.regs.lock().set_syscall_return(0);
	let pid = child.pid;
	// The parent does not run until the child executes a program or exits
	scheduler::schedule();
	Ok(pid as usize)
}
