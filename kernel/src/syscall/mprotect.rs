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

//! The `mprotect` system call changes the protection of a region of memory.

use crate::{
	memory::VirtAddr,
	process::{mem_space, Process},
};
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// Changes the protection of `length` bytes at `addr`.
pub fn mprotect(addr: VirtAddr, length: usize, prot: i32) -> EResult<usize> {
	if !addr.is_aligned_to(PAGE_SIZE) {
		return Err(errno!(EINVAL));
	}
	let mut m_prot = 0;
	if prot & 0b001 != 0 {
		m_prot |= mem_space::PROT_READ;
	}
	if prot & 0b010 != 0 {
		m_prot |= mem_space::PROT_WRITE;
	}
	if prot & 0b100 != 0 {
		m_prot |= mem_space::PROT_EXEC;
	}
	let proc = Process::current();
	let space = proc.mem_space().ok_or_else(|| errno!(ENOMEM))?;
	space.set_prot(addr, length.div_ceil(PAGE_SIZE), m_prot)?;
	Ok(0)
}
