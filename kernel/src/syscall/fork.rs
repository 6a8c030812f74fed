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

//! The `fork` system call duplicates the current process into a new child process. Execution
//! resumes at the same location in both, with a different return value.

use crate::process::{ForkOptions, Process};
use utils::errno::EResult;

/// Duplicates the current process. The child starts with a return value of zero.
pub fn fork() -> EResult<usize> {
	let proc = Process::current();
	let child = proc.fork(ForkOptions::default())?;
	// The child returns zero
	child.regs.lock().set_syscall_return(0);
	Ok(child.pid as usize)
}
