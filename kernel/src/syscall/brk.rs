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

//! The `brk` system call moves the program break.

use crate::{memory::VirtAddr, process::Process};
use utils::{errno, errno::EResult};

/// Moves the program break to `addr`. On failure, the current break is returned unchanged.
pub fn brk(addr: VirtAddr) -> EResult<usize> {
	let proc = Process::current();
	let space = proc.mem_space().ok_or_else(|| errno!(ENOMEM))?;
	Ok(space.brk(addr).0)
}
