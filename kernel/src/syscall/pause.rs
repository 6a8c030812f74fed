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

//! The `pause` system call suspends the calling process until a signal is delivered.

use crate::process::{scheduler, Process, State};
use utils::{errno, errno::EResult};

/// Suspends the process until a signal is delivered. Always returns `EINTR`.
pub fn pause() -> EResult<usize> {
	let proc = Process::current();
	while !proc.has_pending_signal() {
		proc.set_state(State::Sleeping);
		scheduler::schedule();
	}
	Err(errno!(EINTR))
}
