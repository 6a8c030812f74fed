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

//! The GUID Partition Table (GPT) is the successor of the MBR.
//!
//! On a GPT disk, the MBR is protective: its single `0xee` entry points to the GPT header.

use super::{Partition, SectorSource};
use core::{hint::unlikely, mem::size_of};
use macros::AnyRepr;
use utils::{
	bytes::from_bytes,
	collections::vec::Vec,
	errno,
	errno::EResult,
};

/// The signature of the GPT header.
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
/// The offset of the header LBA in the protective MBR entry.
const MBR_ENTRY_LBA_OFF: usize = 0x1be + 8;

/// A Globally Unique IDentifier.
type Guid = [u8; 16];

/// The GPT header.
#[repr(C, packed)]
#[derive(AnyRepr, Clone)]
struct GptHeader {
	/// The signature, `EFI PART`.
	signature: [u8; 8],
	/// The revision of the header format.
	revision: u32,
	/// The size of the header in bytes.
	hdr_size: u32,
	/// The CRC32 of the header.
	hdr_checksum: u32,
	/// Zero.
	reserved: u32,
	/// The LBA of this header.
	current_lba: u64,
	/// The LBA of the alternate header.
	alternate_lba: u64,
	/// The first usable LBA for partitions.
	first_usable: u64,
	/// The last usable LBA for partitions.
	last_usable: u64,
	/// The GUID of the disk.
	disk_guid: Guid,
	/// The LBA of the first partition entry.
	entries_start: u64,
	/// The number of partition entries.
	entries_count: u32,
	/// The size of one partition entry in bytes.
	entry_size: u32,
	/// The CRC32 of the entries array.
	entries_checksum: u32,
}

/// A GPT partition entry.
#[repr(C, packed)]
#[derive(AnyRepr, Clone)]
struct GptEntry {
	/// The partition type's GUID. All-zero means the entry is unused.
	partition_type: Guid,
	/// The partition's GUID.
	guid: Guid,
	/// The first LBA of the partition.
	first_lba: u64,
	/// The last LBA of the partition, inclusive.
	last_lba: u64,
	/// The entry's attributes.
	attributes: u64,
	/// The partition's name, UTF-16.
	name: [u8; 72],
}

/// Reads the GPT of the given source.
///
/// A malformed header or an out-of-bounds entry array fails with [`errno::EINVAL`].
pub(super) fn read(src: &dyn SectorSource) -> EResult<Vec<Partition>> {
	let sector_size = src.sector_size() as usize;
	let mut buf = utils::collections::vec::Vec::new();
	buf.resize(sector_size, 0u8)?;
	// The header LBA comes from the protective MBR entry
	src.read_sector(0, &mut buf)?;
	let hdr_lba = u32::from_le_bytes(
		buf[MBR_ENTRY_LBA_OFF..MBR_ENTRY_LBA_OFF + 4].try_into().unwrap(),
	) as u64;
	if unlikely(hdr_lba == 0 || hdr_lba >= src.sectors_count()) {
		return Err(errno!(EINVAL));
	}
	src.read_sector(hdr_lba, &mut buf)?;
	let hdr: &GptHeader = from_bytes(&buf).ok_or_else(|| errno!(EINVAL))?;
	if unlikely(&hdr.signature != GPT_SIGNATURE) {
		return Err(errno!(EINVAL));
	}
	let entries_start = hdr.entries_start;
	let entries_count = hdr.entries_count as usize;
	let entry_size = hdr.entry_size as usize;
	if unlikely(entry_size < size_of::<GptEntry>() || entries_start >= src.sectors_count()) {
		return Err(errno!(EINVAL));
	}
	let mut partitions = Vec::new();
	let per_sector = sector_size / entry_size;
	let mut sector_buf = Vec::new();
	sector_buf.resize(sector_size, 0u8)?;
	for i in 0..entries_count {
		let sector = entries_start + (i / per_sector) as u64;
		if i % per_sector == 0 {
			src.read_sector(sector, &mut sector_buf)?;
		}
		let off = (i % per_sector) * entry_size;
		let entry: &GptEntry =
			from_bytes(&sector_buf[off..off + entry_size]).ok_or_else(|| errno!(EINVAL))?;
		if entry.partition_type == [0u8; 16] {
			continue;
		}
		let first = entry.first_lba;
		let last = entry.last_lba;
		if unlikely(first > last) {
			return Err(errno!(EINVAL));
		}
		partitions.push(Partition {
			lba: first,
			total_sectors: last - first + 1,
		})?;
	}
	Ok(partitions)
}

#[cfg(test)]
mod test {
	use super::*;

	/// An in-memory disk image.
	struct Image(utils::collections::vec::Vec<u8>);

	impl SectorSource for Image {
		fn read_sector(&self, lba: u64, buf: &mut [u8]) -> EResult<()> {
			let off = lba as usize * 512;
			buf.copy_from_slice(&self.0[off..off + 512]);
			Ok(())
		}

		fn sector_size(&self) -> u32 {
			512
		}

		fn sectors_count(&self) -> u64 {
			(self.0.len() / 512) as u64
		}
	}

	#[test_case]
	fn gpt_scan() {
		let mut img = utils::collections::vec::Vec::new();
		img.resize(4 * 512, 0u8).unwrap();
		// Protective MBR: one 0xee entry pointing to LBA 1
		img[0x1be + 4] = 0xee;
		img[0x1be + 8] = 1;
		img[510] = 0x55;
		img[511] = 0xaa;
		// GPT header at LBA 1
		img[512..520].copy_from_slice(b"EFI PART");
		img[512 + 0x48..512 + 0x50].copy_from_slice(&2u64.to_le_bytes());
		img[512 + 0x50..512 + 0x54].copy_from_slice(&2u32.to_le_bytes());
		img[512 + 0x54..512 + 0x58].copy_from_slice(&128u32.to_le_bytes());
		// First entry at LBA 2: [34, 1000]
		let e = 2 * 512;
		img[e] = 1;
		img[e + 32..e + 40].copy_from_slice(&34u64.to_le_bytes());
		img[e + 40..e + 48].copy_from_slice(&1000u64.to_le_bytes());
		// Second entry is unused (all-zero GUID)
		let parts = read(&Image(img)).unwrap();
		assert_eq!(parts.len(), 1);
		assert_eq!(parts[0].lba, 34);
		assert_eq!(parts[0].total_sectors, 1000 - 34 + 1);
	}
}
