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

//! The `mmap` system call maps memory into the virtual address space of the calling process.

use crate::{
	memory::VirtAddr,
	process::{mem_space, mem_space::RegionType, Process},
};
use core::hint::unlikely;
use utils::{errno, errno::EResult, limits::PAGE_SIZE};

/// Data can be read.
const PROT_READ: i32 = 0b001;
/// Data can be written.
const PROT_WRITE: i32 = 0b010;
/// Data can be executed.
const PROT_EXEC: i32 = 0b100;

/// Changes are shared.
const MAP_SHARED: i32 = 0x01;
/// Changes are private.
const MAP_PRIVATE: i32 = 0x02;
/// Interpret `addr` exactly.
const MAP_FIXED: i32 = 0x10;
/// The mapping is not backed by any file.
const MAP_ANONYMOUS: i32 = 0x20;

/// Converts `mmap` protection and flags to memory space flags.
fn convert_flags(prot: i32, flags: i32) -> (u8, u32) {
	let mut m_prot = 0;
	if prot & PROT_READ != 0 {
		m_prot |= mem_space::PROT_READ;
	}
	if prot & PROT_WRITE != 0 {
		m_prot |= mem_space::PROT_WRITE;
	}
	if prot & PROT_EXEC != 0 {
		m_prot |= mem_space::PROT_EXEC;
	}
	let mut m_flags = 0;
	if flags & MAP_SHARED != 0 {
		m_flags |= mem_space::MAP_SHARED;
	}
	if flags & MAP_PRIVATE != 0 {
		m_flags |= mem_space::MAP_PRIVATE;
	}
	if flags & MAP_FIXED != 0 {
		m_flags |= mem_space::MAP_FIXED;
	}
	if flags & MAP_ANONYMOUS != 0 {
		m_flags |= mem_space::MAP_ANONYMOUS;
	}
	(m_prot, m_flags)
}

/// Maps `length` bytes at `addr` (exactly when `MAP_FIXED` is given, as a hint otherwise).
///
/// When `fd` is non-negative, the mapping is backed by the open file at `offset`.
pub fn mmap(
	addr: VirtAddr,
	length: usize,
	prot: i32,
	flags: i32,
	fd: i32,
	offset: u64,
) -> EResult<usize> {
	if unlikely(length == 0 || !addr.is_aligned_to(PAGE_SIZE)) {
		return Err(errno!(EINVAL));
	}
	let pages = length.div_ceil(PAGE_SIZE);
	let proc = Process::current();
	let (m_prot, m_flags) = convert_flags(prot, flags);
	// The backing file, if any
	let node = if flags & MAP_ANONYMOUS == 0 && fd >= 0 {
		if offset % PAGE_SIZE as u64 != 0 {
			return Err(errno!(EINVAL));
		}
		let fds = proc.fd_table().ok_or_else(|| errno!(EBADF))?;
		let node = {
			let fds = fds.lock();
			fds.get(fd as u32)?.file.node.clone()
		};
		let stat = node.stat();
		let creds = proc.credentials();
		if prot & PROT_READ != 0 && !creds.can_read(&stat) {
			return Err(errno!(EACCES));
		}
		if prot & PROT_WRITE != 0 && flags & MAP_SHARED != 0 && !creds.can_write(&stat) {
			return Err(errno!(EACCES));
		}
		Some(node)
	} else {
		None
	};
	let space = proc.mem_space().ok_or_else(|| errno!(ENOMEM))?;
	let file_len = node.as_ref().map(|n| n.size().saturating_sub(offset)).unwrap_or(0);
	let addr = space.map(
		addr,
		pages,
		m_prot,
		RegionType::Data,
		m_flags,
		node,
		offset,
		file_len,
		flags & MAP_FIXED != 0,
	)?;
	Ok(addr.0)
}
