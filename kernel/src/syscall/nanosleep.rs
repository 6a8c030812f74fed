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

//! The `nanosleep` system call suspends the calling process for a duration.

use crate::{
	memory::user::UserPtr,
	process::{scheduler, Process, State},
	time,
	time::unit::Timespec,
};
use utils::{errno, errno::EResult};

/// Suspends the process for the duration in `req`.
///
/// When interrupted by a signal, the remaining time is written to `rem` and the call fails
/// with `EINTR`.
pub fn nanosleep(req: UserPtr<Timespec>, rem: UserPtr<Timespec>) -> EResult<usize> {
	let req = req.copy_from_user()?.ok_or_else(|| errno!(EFAULT))?;
	if !req.is_valid() {
		return Err(errno!(EINVAL));
	}
	let deadline = time::sleep_register(req)?;
	let proc = Process::current();
	loop {
		let now = time::ticks();
		if now >= deadline {
			return Ok(0);
		}
		proc.set_state(State::Sleeping);
		scheduler::schedule();
		if proc.has_pending_signal() {
			let remain_ticks = deadline.saturating_sub(time::ticks());
			let remain = Timespec::from_nanos(remain_ticks * time::NSECS_PER_TICK);
			rem.copy_to_user(&remain)?;
			return Err(errno!(EINTR));
		}
	}
}
