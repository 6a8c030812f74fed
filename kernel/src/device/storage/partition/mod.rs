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

//! Partition tables.
//!
//! A storage device can be divided into several partitions. Each valid partition found by the
//! scan is registered as a separate minor with the scanned device as its backing.

pub mod gpt;
pub mod mbr;

use utils::{collections::vec::Vec, errno::EResult};

/// A partition's bounds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
	/// The LBA of the first sector of the partition.
	pub lba: u64,
	/// The number of sectors in the partition.
	pub total_sectors: u64,
}

/// A source of sectors, to read partition tables from.
pub trait SectorSource {
	/// Reads the sector at the given LBA into `buf`.
	///
	/// `buf` must be exactly one sector long.
	fn read_sector(&self, lba: u64, buf: &mut [u8]) -> EResult<()>;

	/// Returns the size of a sector in bytes.
	fn sector_size(&self) -> u32;

	/// Returns the number of sectors of the source.
	fn sectors_count(&self) -> u64;
}

/// Scans the partition table of the given source.
///
/// The MBR is read first; when it announces a protective GPT, the GPT is walked instead.
///
/// If the source holds no partition table, the function returns an empty list.
pub fn scan(src: &dyn SectorSource) -> EResult<Vec<Partition>> {
	match mbr::read(src)? {
		mbr::ScanResult::Partitions(parts) => Ok(parts),
		mbr::ScanResult::Gpt => gpt::read(src),
		mbr::ScanResult::None => Ok(Vec::new()),
	}
}
