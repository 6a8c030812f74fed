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

//! The `semctl` system call controls a semaphore set.

use crate::{ipc::sem, process::Process};
use utils::errno::EResult;

/// Performs the control operation `cmd` on the semaphore `semnum` of the set `semid`.
pub fn semctl(semid: i32, semnum: i32, cmd: i32, arg: usize) -> EResult<usize> {
	let proc = Process::current();
	let res = sem::semctl(&proc, semid, semnum as usize, cmd, arg as i32)?;
	Ok(res as usize)
}
