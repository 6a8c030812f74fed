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

//! ELF image parsing.

use super::*;
use core::mem::size_of;
use utils::{bytes::from_bytes, errno, errno::EResult};

/// A parsed view over an ELF image in memory.
#[derive(Debug)]
pub struct ElfParser<'a> {
	/// The raw image.
	image: &'a [u8],
}

impl<'a> ElfParser<'a> {
	/// Parses the given image, validating its header.
	///
	/// A malformed or unsupported image fails with [`errno::ENOEXEC`].
	pub fn new(image: &'a [u8]) -> EResult<Self> {
		let parser = Self {
			image,
		};
		let hdr = parser.try_hdr().ok_or_else(|| errno!(ENOEXEC))?;
		if &hdr.e_ident[..4] != ELF_MAGIC {
			return Err(errno!(ENOEXEC));
		}
		if hdr.e_ident[4] != ELFCLASS64 || hdr.e_ident[5] != ELFDATA2LSB {
			return Err(errno!(ENOEXEC));
		}
		if hdr.e_phentsize as usize != size_of::<Elf64Phdr>() && hdr.e_phnum > 0 {
			return Err(errno!(ENOEXEC));
		}
		// Bounds of the header tables
		let ph_end = hdr.e_phoff as usize
			+ hdr.e_phnum as usize * hdr.e_phentsize as usize;
		let sh_end = hdr.e_shoff as usize
			+ hdr.e_shnum as usize * hdr.e_shentsize as usize;
		if ph_end > image.len() || sh_end > image.len() {
			return Err(errno!(ENOEXEC));
		}
		Ok(parser)
	}

	fn try_hdr(&self) -> Option<&'a Elf64Ehdr> {
		from_bytes(self.image)
	}

	/// Returns the image's header.
	pub fn hdr(&self) -> &'a Elf64Ehdr {
		self.try_hdr().unwrap()
	}

	/// Returns the raw image.
	pub fn image(&self) -> &'a [u8] {
		self.image
	}

	/// Returns an iterator over the program headers.
	pub fn segments(&self) -> impl Iterator<Item = &'a Elf64Phdr> + '_ {
		let hdr = self.hdr();
		let off = hdr.e_phoff as usize;
		(0..hdr.e_phnum as usize).filter_map(move |i| {
			let begin = off + i * size_of::<Elf64Phdr>();
			from_bytes(&self.image[begin..])
		})
	}

	/// Returns an iterator over the section headers.
	pub fn sections(&self) -> impl Iterator<Item = &'a Elf64Shdr> + '_ {
		let hdr = self.hdr();
		let off = hdr.e_shoff as usize;
		let entsize = hdr.e_shentsize as usize;
		(0..hdr.e_shnum as usize).filter_map(move |i| {
			let begin = off + i * entsize;
			from_bytes(&self.image[begin..])
		})
	}

	/// Returns the section at the given index.
	pub fn section(&self, index: usize) -> Option<&'a Elf64Shdr> {
		let hdr = self.hdr();
		if index >= hdr.e_shnum as usize {
			return None;
		}
		let begin = hdr.e_shoff as usize + index * hdr.e_shentsize as usize;
		from_bytes(&self.image[begin..])
	}

	/// Returns the content of the given section.
	pub fn section_content(&self, section: &Elf64Shdr) -> Option<&'a [u8]> {
		if section.sh_type == SHT_NOBITS {
			return Some(&[]);
		}
		let begin = section.sh_offset as usize;
		let end = begin.checked_add(section.sh_size as usize)?;
		self.image.get(begin..end)
	}

	/// Returns the string at offset `off` of the string table section `strtab`.
	pub fn string_at(&self, strtab: &Elf64Shdr, off: usize) -> Option<&'a [u8]> {
		let content = self.section_content(strtab)?;
		let s = content.get(off..)?;
		let end = s.iter().position(|b| *b == 0)?;
		Some(&s[..end])
	}

	/// Returns the content of the segment pointed by `phdr`.
	pub fn segment_content(&self, phdr: &Elf64Phdr) -> Option<&'a [u8]> {
		let begin = phdr.p_offset as usize;
		let end = begin.checked_add(phdr.p_filesz as usize)?;
		self.image.get(begin..end)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn minimal_ehdr() -> Elf64Ehdr {
		let mut e_ident = [0u8; 16];
		e_ident[..4].copy_from_slice(ELF_MAGIC);
		e_ident[4] = ELFCLASS64;
		e_ident[5] = ELFDATA2LSB;
		Elf64Ehdr {
			e_ident,
			e_type: ET_EXEC,
			e_machine: 0x3e,
			e_version: 1,
			e_entry: 0x1000,
			e_phoff: 0,
			e_shoff: 0,
			e_flags: 0,
			e_ehsize: size_of::<Elf64Ehdr>() as u16,
			e_phentsize: size_of::<Elf64Phdr>() as u16,
			e_phnum: 0,
			e_shentsize: size_of::<Elf64Shdr>() as u16,
			e_shnum: 0,
			e_shstrndx: 0,
		}
	}

	#[test_case]
	fn elf_parse_minimal() {
		let hdr = minimal_ehdr();
		let image = utils::bytes::as_bytes(&hdr);
		let parser = ElfParser::new(image).unwrap();
		assert_eq!(parser.hdr().e_entry, 0x1000);
		assert_eq!(parser.segments().count(), 0);
	}

	#[test_case]
	fn elf_parse_bad_magic() {
		let mut hdr = minimal_ehdr();
		hdr.e_ident[0] = 0;
		let image = utils::bytes::as_bytes(&hdr);
		assert_eq!(ElfParser::new(image).unwrap_err(), errno!(ENOEXEC));
	}

	#[test_case]
	fn elf_parse_truncated_phdrs() {
		let mut hdr = minimal_ehdr();
		hdr.e_phnum = 4;
		hdr.e_phoff = size_of::<Elf64Ehdr>() as u64;
		let image = utils::bytes::as_bytes(&hdr);
		assert_eq!(ElfParser::new(image).unwrap_err(), errno!(ENOEXEC));
	}
}
