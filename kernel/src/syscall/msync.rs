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

//! The `msync` system call writes a shared file mapping back to the backing file.

use crate::{memory::VirtAddr, process::Process};
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// Synchronizes `length` bytes of mapped memory at `addr` to the backing storage.
pub fn msync(addr: VirtAddr, length: usize, _flags: i32) -> EResult<usize> {
	if !addr.is_aligned_to(PAGE_SIZE) {
		return Err(errno!(EINVAL));
	}
	let proc = Process::current();
	let space = proc.mem_space().ok_or_else(|| errno!(ENOMEM))?;
	space.sync(addr, length.div_ceil(PAGE_SIZE))?;
	Ok(0)
}
