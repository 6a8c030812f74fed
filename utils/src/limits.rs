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

//! System limits.

/// The size of a page of memory in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Maximum length of a path in bytes.
pub const PATH_MAX: usize = 4096;
/// Maximum length of a filename in bytes.
pub const NAME_MAX: usize = 255;
/// Maximum number of links to a file.
pub const LINK_MAX: usize = 32000;
/// Maximum number of open file descriptors per process.
pub const OPEN_MAX: usize = 1024;
/// Maximum number of elements in an I/O vector.
pub const IOV_MAX: usize = 1024;
/// Maximum length of the hostname.
pub const HOST_NAME_MAX: usize = 64;
/// Maximum length of arguments and environment to an `execve` call, in bytes.
pub const ARG_MAX: usize = 2097152;

/// Maximum number of semaphores per semaphore set.
pub const SEMMSL: usize = 32000;
/// Maximum number of operations in a single `semop` call.
pub const SEMOPM: usize = 500;
/// Maximum value of a semaphore.
pub const SEMVMX: i32 = 32767;
