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

//! The `clock_gettime` system call reads a clock.

use crate::{
	memory::user::UserPtr,
	time,
	time::unit::{Timespec, CLOCK_MONOTONIC, CLOCK_REALTIME},
};
use utils::{errno, errno::EResult};

/// Reads the clock `clockid` into `tp`.
pub fn clock_gettime(clockid: u32, tp: UserPtr<Timespec>) -> EResult<usize> {
	let ts = match clockid {
		CLOCK_REALTIME => time::realtime(),
		CLOCK_MONOTONIC => time::monotonic(),
		_ => return Err(errno!(EINVAL)),
	};
	tp.copy_to_user(&ts)?;
	Ok(0)
}
