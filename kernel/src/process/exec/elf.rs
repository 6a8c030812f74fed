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

//! The ELF program loader.
//!
//! Loadable segments are attached as memory regions backed by the executable's node: data is
//! paged in on demand through the page cache, unless eager loading is requested.

use super::ProgramImage;
use crate::{
	elf::{
		parser::ElfParser, Elf64Phdr, ET_DYN, ET_EXEC, PF_W, PF_X, PT_INTERP, PT_LOAD,
	},
	file::vfs,
	memory::VirtAddr,
	process::{
		mem_space,
		mem_space::{MemSpace, RegionType, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE, USER_MEM_END},
		Process, PROP_DYNAMICALLY_LOADED,
	},
};
use core::hint::unlikely;
use utils::{
	collections::{path::Path, vec::Vec},
	errno,
	errno::EResult,
	limits::PAGE_SIZE,
	ptr::arc::Arc,
};

/// The base address for position independent executables.
const ET_DYN_BASE: usize = 0x555555554000;
/// The base address for the program interpreter.
const INTERP_BASE: usize = 0x7f0000000000;

/// The result of a program load.
pub struct LoadInfo {
	/// The entry point: the program's, or the interpreter's when one is present.
	pub entry: VirtAddr,
	/// The program's own entry point.
	pub prog_entry: VirtAddr,
	/// The address of the program headers in the new address space.
	pub phdr: VirtAddr,
	/// The number of program headers.
	pub phnum: usize,
	/// The base address of the interpreter, zero when none is present.
	pub interp_base: VirtAddr,
}

/// Returns the memory protection matching the segment flags.
fn segment_prot(p_flags: u32) -> u8 {
	let mut prot = PROT_READ;
	if p_flags & PF_W != 0 {
		prot |= PROT_WRITE;
	}
	if p_flags & PF_X != 0 {
		prot |= PROT_EXEC;
	}
	prot
}

/// Validates the loadable segment `phdr`, biased by `base`.
fn check_segment(phdr: &Elf64Phdr, base: usize) -> EResult<()> {
	if unlikely(phdr.p_memsz < phdr.p_filesz) {
		return Err(errno!(ENOEXEC));
	}
	if unlikely(phdr.p_align as usize > PAGE_SIZE && phdr.p_align != 0x200000) {
		return Err(errno!(ENOEXEC));
	}
	if unlikely(phdr.p_align != 0 && phdr.p_vaddr % phdr.p_align != phdr.p_offset % phdr.p_align)
	{
		return Err(errno!(ENOEXEC));
	}
	let end = base
		.checked_add(phdr.p_vaddr as usize)
		.and_then(|a| a.checked_add(phdr.p_memsz as usize))
		.ok_or_else(|| errno!(ENOEXEC))?;
	if unlikely(end > USER_MEM_END.0) {
		return Err(errno!(ENOEXEC));
	}
	Ok(())
}

/// Attaches the segment `phdr` of `image` to `space`, biased by `base`.
///
/// The part of the segment covered by file content is mapped from the executable's node; the
/// remainder (the zero-initialized tail) is mapped anonymously. The bytes of the boundary
/// page that lie past the file content are written eagerly.
fn map_segment(
	space: &Arc<MemSpace>,
	image: &ProgramImage,
	phdr: &Elf64Phdr,
	base: usize,
) -> EResult<()> {
	let vaddr = VirtAddr(base + phdr.p_vaddr as usize);
	let begin = vaddr.down_align_to(PAGE_SIZE);
	let head = vaddr.0 - begin.0;
	let file_off = (phdr.p_offset as usize)
		.checked_sub(head)
		.ok_or_else(|| errno!(ENOEXEC))?;
	let file_end = vaddr + phdr.p_filesz as usize;
	let mem_end = vaddr + phdr.p_memsz as usize;
	let prot = segment_prot(phdr.p_flags);
	// Pages entirely covered by file content
	let file_pages = (file_end.0 - begin.0) / PAGE_SIZE;
	if file_pages > 0 {
		space.map(
			begin,
			file_pages,
			prot,
			if prot & PROT_EXEC != 0 {
				RegionType::Text
			} else {
				RegionType::Data
			},
			MAP_PRIVATE | mem_space::MAP_FIXED,
			Some(image.node.clone()),
			file_off as u64,
			(head as u64) + phdr.p_filesz,
			true,
		)?;
	}
	// Remaining pages are anonymous (the zero-initialized tail)
	let anon_begin = begin + file_pages * PAGE_SIZE;
	if mem_end > anon_begin {
		let anon_pages = (mem_end.align_to(PAGE_SIZE).0 - anon_begin.0) / PAGE_SIZE;
		space.map(
			anon_begin,
			anon_pages,
			prot,
			RegionType::Data,
			MAP_PRIVATE | mem_space::MAP_ANONYMOUS | mem_space::MAP_FIXED,
			None,
			0,
			0,
			true,
		)?;
		// File bytes of the boundary page
		if file_end > anon_begin {
			let off = file_off + (anon_begin.0 - begin.0);
			let len = file_end.0 - anon_begin.0;
			let content = image
				.image
				.get(off..off + len)
				.ok_or_else(|| errno!(ENOEXEC))?;
			space.write_user(anon_begin, content)?;
		}
	}
	Ok(())
}

/// Loads the ELF image of `prog` into `space`.
///
/// If `load_now` is set, every page of the program is populated immediately instead of on
/// fault.
pub fn load(space: &Arc<MemSpace>, prog: &ProgramImage, load_now: bool) -> EResult<LoadInfo> {
	let info = load_impl(space, prog, INTERP_BASE, true, load_now)?;
	Ok(info)
}

fn load_impl(
	space: &Arc<MemSpace>,
	prog: &ProgramImage,
	interp_base: usize,
	allow_interp: bool,
	load_now: bool,
) -> EResult<LoadInfo> {
	let parser = ElfParser::new(&prog.image)?;
	let hdr = parser.hdr();
	if unlikely(!matches!(hdr.e_type, ET_EXEC | ET_DYN)) {
		return Err(errno!(ENOEXEC));
	}
	// The base address is chosen once for all segments
	let base = if hdr.e_type == ET_DYN {
		if allow_interp {
			ET_DYN_BASE
		} else {
			interp_base
		}
	} else {
		0
	};
	let mut interp: Option<Vec<u8>> = None;
	let mut first_load = usize::MAX;
	for phdr in parser.segments() {
		match phdr.p_type {
			PT_LOAD => {
				check_segment(phdr, base)?;
				map_segment(space, prog, phdr, base)?;
				first_load = usize::min(first_load, base + phdr.p_vaddr as usize);
				if load_now {
					let begin = VirtAddr(base + phdr.p_vaddr as usize)
						.down_align_to(PAGE_SIZE);
					space.populate(begin, phdr.p_memsz as usize, false)?;
				}
			}
			PT_INTERP if allow_interp => {
				let content = parser
					.segment_content(phdr)
					.ok_or_else(|| errno!(ENOEXEC))?;
				// Drop the NUL terminator
				let path = content.split(|b| *b == 0).next().unwrap_or(content);
				interp = Some(Vec::try_from(path)?);
			}
			_ => {}
		}
	}
	let prog_entry = VirtAddr(base + hdr.e_entry as usize);
	let phdr_addr = if first_load != usize::MAX {
		VirtAddr(first_load + hdr.e_phoff as usize)
	} else {
		VirtAddr::default()
	};
	let mut info = LoadInfo {
		entry: prog_entry,
		prog_entry,
		phdr: phdr_addr,
		phnum: hdr.e_phnum as usize,
		interp_base: VirtAddr::default(),
	};
	// Hand over to the dynamic loader when an interpreter is requested
	if let Some(interp) = interp {
		let interp_info = ldso_load(space, &interp, interp_base, load_now)?;
		info.entry = interp_info.entry;
		info.interp_base = VirtAddr(interp_base);
	}
	Ok(info)
}

/// Loads the program interpreter at `path`, biased at `base`.
///
/// The calling process is marked as running a dynamically linked program.
fn ldso_load(
	space: &Arc<MemSpace>,
	path: &[u8],
	base: usize,
	load_now: bool,
) -> EResult<LoadInfo> {
	let path = Path::new(path)?;
	let node = vfs::node_from_path(path)?;
	let proc = Process::current();
	let image = super::build_image(
		&proc,
		node,
		Vec::new(),
		Vec::new(),
	)?;
	let info = load_impl(space, &image, base, false, load_now)?;
	proc.add_props(PROP_DYNAMICALLY_LOADED);
	Ok(info)
}
