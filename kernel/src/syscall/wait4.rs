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

//! The `wait4` system call waits for a child process to change state and reaps it.

use crate::{
	memory::user::UserPtr,
	process,
	process::{scheduler, Process, State},
};
use utils::{errno, errno::EResult};

/// Wait flag: do not block when no child has changed state.
const WNOHANG: i32 = 1;

/// Waits for a child to terminate, writes its status to `wstatus` and returns its PID.
///
/// `pid` selects the child: `-1` for any child, a positive value for a specific one.
pub fn wait4(pid: i32, wstatus: UserPtr<i32>, options: i32, _rusage: usize) -> EResult<usize> {
	let proc = Process::current();
	loop {
		let children = proc.children_pids();
		if children.is_empty() {
			return Err(errno!(ECHILD));
		}
		let mut found = false;
		for child_pid in children.iter() {
			if pid > 0 && *child_pid != pid as u32 {
				continue;
			}
			found = true;
			let Some(child) = process::get_by_pid(*child_pid) else {
				continue;
			};
			if child.state() == State::Zombie {
				let status = child.wait_status();
				wstatus.copy_to_user(&(status as i32))?;
				proc.forget_child(*child_pid);
				child.reap();
				return Ok(*child_pid as usize);
			}
		}
		if !found {
			return Err(errno!(ECHILD));
		}
		if options & WNOHANG != 0 {
			return Ok(0);
		}
		// Sleep until a child changes state (SIGCHLD wakes us)
		scheduler::block_on(Process::current().pid as usize ^ 0x77616974)?;
	}
}
