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

//! The `mremap` system call resizes or moves a memory mapping.

use crate::{memory::VirtAddr, process::Process};
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// `mremap` flag: the mapping may be moved.
const MREMAP_MAYMOVE: i32 = 1;

/// Resizes the mapping at `old_addr` from `old_len` to `new_len` bytes, moving it if needed
/// and allowed.
pub fn mremap(
	old_addr: VirtAddr,
	old_len: usize,
	new_len: usize,
	flags: i32,
) -> EResult<usize> {
	if old_len == 0 || new_len == 0 {
		return Err(errno!(EINVAL));
	}
	let proc = Process::current();
	let space = proc.mem_space().ok_or_else(|| errno!(ENOMEM))?;
	let addr = space.remap(
		old_addr,
		old_len.div_ceil(PAGE_SIZE),
		new_len.div_ceil(PAGE_SIZE),
		flags & MREMAP_MAYMOVE != 0,
	)?;
	Ok(addr.0)
}
