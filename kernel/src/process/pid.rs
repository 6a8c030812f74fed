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

//! Process identifiers.

use crate::sync::{mutex::Mutex, once::OnceInit};
use utils::{collections::id_allocator::IDAllocator, errno::AllocResult};

/// A process identifier.
pub type Pid = u32;

/// The PID of the init process.
pub const INIT_PID: Pid = 1;
/// The highest allocatable PID.
const MAX_PID: Pid = 32768;

/// The PID allocator.
static ALLOCATOR: OnceInit<Mutex<IDAllocator>> = unsafe { OnceInit::new() };

/// Initializes the PID allocator.
pub(super) fn init() -> AllocResult<()> {
	unsafe {
		OnceInit::init(&ALLOCATOR, Mutex::new(IDAllocator::new(INIT_PID, MAX_PID)?));
	}
	Ok(())
}

/// Allocates a PID.
///
/// If every PID is in use, the function returns `None`.
pub fn alloc() -> Option<Pid> {
	ALLOCATOR.get().lock().alloc()
}

/// Releases the given PID.
pub fn free(pid: Pid) {
	ALLOCATOR.get().lock().free(pid);
}
