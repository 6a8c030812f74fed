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

//! The `_exit` system call terminates the calling thread; `exit_group` terminates the whole
//! thread group.

use crate::process::Process;
use utils::errno::EResult;

/// Terminates the calling process with the given status.
pub fn _exit(status: i32) -> EResult<usize> {
	let proc = Process::current();
	proc.exit(status as u32, false);
	// The process cannot resume execution
	unreachable!();
}

/// Terminates every thread of the calling process's group.
pub fn exit_group(status: i32) -> EResult<usize> {
	let proc = Process::current();
	proc.kill_peer_threads();
	proc.exit(status as u32, false);
	unreachable!();
}
