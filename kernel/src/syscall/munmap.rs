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

//! The `munmap` system call unmaps a region of the virtual address space.

use crate::{memory::VirtAddr, process::Process};
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// Unmaps `length` bytes at `addr`.
pub fn munmap(addr: VirtAddr, length: usize) -> EResult<usize> {
	if length == 0 || !addr.is_aligned_to(PAGE_SIZE) {
		return Err(errno!(EINVAL));
	}
	let proc = Process::current();
	let space = proc.mem_space().ok_or_else(|| errno!(ENOMEM))?;
	space.unmap(addr, length.div_ceil(PAGE_SIZE))?;
	Ok(0)
}
