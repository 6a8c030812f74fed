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

//! The Master Boot Record (MBR) is a standard partition table format used on the x86
//! architecture.
//!
//! The table is located on the first sector of the disk, alongside the boot code. The four
//! 16-byte partition entries are at offsets `0x1be`, `0x1ce`, `0x1de` and `0x1ee`.

use super::{Partition, SectorSource};
use core::hint::unlikely;
use macros::AnyRepr;
use utils::{
	bytes::from_bytes,
	collections::vec::Vec,
	errno::EResult,
};

/// The signature of the MBR partition table.
const MBR_SIGNATURE: u16 = 0xaa55;
/// The partition type announcing a protective MBR on a GPT disk.
const PARTITION_TYPE_GPT: u8 = 0xee;

/// A MBR partition entry.
#[repr(C, packed)]
#[derive(AnyRepr, Clone)]
struct MbrPartition {
	/// Partition attributes.
	attrs: u8,
	/// CHS address of partition start.
	chs_start: [u8; 3],
	/// The type of the partition.
	partition_type: u8,
	/// CHS address of partition end.
	chs_end: [u8; 3],
	/// LBA address of partition start.
	lba_start: u32,
	/// The number of sectors in the partition.
	sectors_count: u32,
}

/// A MBR partition table.
#[repr(C, packed)]
#[derive(AnyRepr)]
struct MbrTable {
	/// The boot code.
	boot: [u8; 440],
	/// The disk signature (optional).
	disk_signature: u32,
	/// Zero.
	zero: u16,
	/// The list of partitions.
	partitions: [MbrPartition; 4],
	/// The partition table signature.
	signature: u16,
}

/// The result of the MBR scan.
pub(super) enum ScanResult {
	/// MBR partitions were found.
	Partitions(Vec<Partition>),
	/// The MBR is protective: the disk is GPT-partitioned.
	Gpt,
	/// No partition table is present.
	None,
}

/// Reads the MBR of the given source.
pub(super) fn read(src: &dyn SectorSource) -> EResult<ScanResult> {
	let mut buf = [0u8; 512];
	src.read_sector(0, &mut buf)?;
	let table: &MbrTable = from_bytes(&buf).unwrap();
	if unlikely(table.signature != MBR_SIGNATURE) {
		return Ok(ScanResult::None);
	}
	if table
		.partitions
		.iter()
		.any(|p| p.partition_type == PARTITION_TYPE_GPT)
	{
		return Ok(ScanResult::Gpt);
	}
	let mut partitions = Vec::new();
	for p in table.partitions.iter().filter(|p| p.partition_type != 0) {
		partitions.push(Partition {
			lba: p.lba_start as _,
			total_sectors: p.sectors_count as _,
		})?;
	}
	Ok(ScanResult::Partitions(partitions))
}

#[cfg(test)]
mod test {
	use super::*;

	struct OneSector([u8; 512]);

	impl SectorSource for OneSector {
		fn read_sector(&self, lba: u64, buf: &mut [u8]) -> EResult<()> {
			assert_eq!(lba, 0);
			buf.copy_from_slice(&self.0);
			Ok(())
		}

		fn sector_size(&self) -> u32 {
			512
		}

		fn sectors_count(&self) -> u64 {
			1
		}
	}

	#[test_case]
	fn mbr_single_partition() {
		let mut sector = [0u8; 512];
		sector[0x1be..0x1ce].copy_from_slice(&[
			0x80, 0x01, 0x01, 0x00, 0x83, 0xfe, 0xff, 0xff, 0x01, 0x00, 0x00, 0x00, 0xff,
			0x3f, 0x00, 0x00,
		]);
		sector[510] = 0x55;
		sector[511] = 0xaa;
		let res = read(&OneSector(sector)).unwrap();
		let ScanResult::Partitions(parts) = res else {
			panic!("expected MBR partitions");
		};
		assert_eq!(parts.len(), 1);
		assert_eq!(parts[0].lba, 1);
		assert_eq!(parts[0].total_sectors, 0x3fff);
	}

	#[test_case]
	fn mbr_no_signature() {
		let res = read(&OneSector([0u8; 512])).unwrap();
		assert!(matches!(res, ScanResult::None));
	}
}
