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

//! The `semop` system call performs operations on a semaphore set.

use crate::{ipc::sem, memory::user::UserSlice, process::Process};
use utils::{errno, errno::EResult};

/// Performs the given batch of semaphore operations, atomically per set.
pub fn semop(semid: i32, sops: usize, nsops: usize) -> EResult<usize> {
	if nsops == 0 {
		return Err(errno!(EINVAL));
	}
	let ops = UserSlice::<sem::SemBuf>::from_user(sops, nsops).copy_from_user()?;
	let proc = Process::current();
	sem::semop(&proc, semid, &ops)?;
	Ok(0)
}
