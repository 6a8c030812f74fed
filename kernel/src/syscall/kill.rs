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

//! The `kill` system call sends a signal to a process.

use crate::process;
use crate::process::signal::Signal;
use utils::{errno, errno::EResult};

/// Sends the signal `sig` to the process with PID `pid`.
///
/// A zero signal performs the permission and existence checks only.
pub fn kill(pid: i32, sig: u32) -> EResult<usize> {
	if pid <= 0 {
		// Process groups are out of the picture for now
		return Err(errno!(ESRCH));
	}
	let target = process::get_by_pid(pid as u32).ok_or_else(|| errno!(ESRCH))?;
	if sig != 0 {
		target.kill(Signal::try_from(sig)?);
	}
	Ok(0)
}
