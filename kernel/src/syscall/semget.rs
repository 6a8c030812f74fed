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

//! The `semget` system call creates or retrieves a semaphore set.

use crate::ipc::sem;
use utils::errno::EResult;

/// Creates or retrieves the semaphore set with the given key.
pub fn semget(key: i32, nsems: i32, semflg: i32) -> EResult<usize> {
	if nsems < 0 {
		return Err(utils::errno!(EINVAL));
	}
	let id = sem::semget(key, nsems as usize, semflg)?;
	Ok(id as usize)
}
