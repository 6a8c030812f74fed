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

//! Kernel module loading.
//!
//! A module is a relocatable ELF object. Its allocated sections are loaded into the
//! kernel-module arena, undefined symbols are resolved against the kernel's symbol table, the
//! relocations are applied, then the module's `init` entry point is called. Unloading calls
//! `cleanup` and releases the memory.

use crate::{
	elf,
	elf::{
		kernel, parser::ElfParser, Elf64Rela, Elf64Shdr, Elf64Sym, ET_REL, R_X86_64_32S,
		R_X86_64_64, R_X86_64_PC32, R_X86_64_PLT32, SHF_ALLOC, SHN_UNDEF, SHT_NOBITS,
		SHT_RELA, SHT_SYMTAB,
	},
	memory::{arena, arena::Arena, VirtAddr},
	println,
	sync::mutex::Mutex,
};
use core::mem::size_of;
use utils::{
	bytes::from_bytes,
	collections::{string::String, vec::Vec},
	errno,
	errno::EResult,
	limits::PAGE_SIZE,
};

/// The name of the module initialization entry point.
const INIT_SYM: &[u8] = b"init_module";
/// The name of the module cleanup entry point.
const CLEANUP_SYM: &[u8] = b"cleanup_module";

/// A loaded kernel module.
pub struct Module {
	/// The name of the module.
	pub name: String,
	/// The base address of the module's memory.
	mem: VirtAddr,
	/// The size of the module's memory in pages.
	pages: usize,
	/// The address of the cleanup entry point, if any.
	cleanup: Option<usize>,
}

/// The list of loaded modules.
static MODULES: Mutex<Vec<Module>> = Mutex::new(Vec::new());

/// The load address of each section of the image being loaded.
struct SectionMap {
	/// Per-section offset from the module base. `usize::MAX` for sections not loaded.
	offsets: Vec<usize>,
	/// The total size of the loaded sections, in bytes.
	total: usize,
}

/// Lays out the allocated sections of the image.
fn layout_sections(parser: &ElfParser) -> EResult<SectionMap> {
	let mut offsets = Vec::new();
	let mut total = 0usize;
	for section in parser.sections() {
		if section.sh_flags & SHF_ALLOC == 0 {
			offsets.push(usize::MAX)?;
			continue;
		}
		let align = usize::max(section.sh_addralign as usize, 1);
		total = total.next_multiple_of(align);
		offsets.push(total)?;
		total += section.sh_size as usize;
	}
	Ok(SectionMap {
		offsets,
		total,
	})
}

/// Resolves the value of the symbol `sym` of the image, against the module's own sections or
/// the kernel symbol table.
fn resolve_symbol(
	parser: &ElfParser,
	map: &SectionMap,
	base: VirtAddr,
	strtab: &Elf64Shdr,
	sym: &Elf64Sym,
) -> EResult<usize> {
	if sym.st_shndx != SHN_UNDEF {
		// Defined in the module itself
		let off = map
			.offsets
			.get(sym.st_shndx as usize)
			.copied()
			.filter(|off| *off != usize::MAX)
			.ok_or_else(|| errno!(ENOEXEC))?;
		return Ok(base.0 + off + sym.st_value as usize);
	}
	// Undefined: resolve against the kernel
	let name = parser
		.string_at(strtab, sym.st_name as usize)
		.ok_or_else(|| errno!(ENOEXEC))?;
	kernel::resolve(name).ok_or_else(|| {
		println!("unresolved symbol in kernel module: {}", utils::DisplayableStr(name));
		errno!(ENOEXEC)
	})
}

/// Applies the relocation `rela` of the section at `target_off`.
fn apply_rela(
	base: VirtAddr,
	target_off: usize,
	rela: &Elf64Rela,
	sym_value: usize,
) -> EResult<()> {
	let place = base.0 + target_off + rela.r_offset as usize;
	let value = sym_value.wrapping_add_signed(rela.r_addend as isize);
	match rela.type_() {
		R_X86_64_64 => unsafe {
			(place as *mut u64).write_unaligned(value as u64);
		},
		R_X86_64_PC32 | R_X86_64_PLT32 => {
			let rel = value.wrapping_sub(place) as i64;
			if !(i32::MIN as i64..=i32::MAX as i64).contains(&rel) {
				return Err(errno!(ENOEXEC));
			}
			unsafe {
				(place as *mut i32).write_unaligned(rel as i32);
			}
		}
		R_X86_64_32S => {
			let val = value as i64;
			if !(i32::MIN as i64..=i32::MAX as i64).contains(&val) {
				return Err(errno!(ENOEXEC));
			}
			unsafe {
				(place as *mut i32).write_unaligned(val as i32);
			}
		}
		_ => return Err(errno!(ENOEXEC)),
	}
	Ok(())
}

/// Loads the kernel module contained in `image` under the given name, and calls its `init`
/// entry point.
///
/// Loading two modules with the same name fails with [`errno::EEXIST`].
pub fn load(name: &[u8], image: &[u8]) -> EResult<()> {
	{
		let modules = MODULES.lock();
		if modules.iter().any(|m| m.name == *name) {
			return Err(errno!(EEXIST));
		}
	}
	let parser = ElfParser::new(image)?;
	if parser.hdr().e_type != ET_REL {
		return Err(errno!(ENOEXEC));
	}
	// Load the allocated sections
	let map = layout_sections(&parser)?;
	let pages = map.total.div_ceil(PAGE_SIZE);
	if pages == 0 {
		return Err(errno!(ENOEXEC));
	}
	let base = arena::alloc_mapped_range(
		Arena::Kmodule,
		pages,
		arena::default_flags(Arena::Kmodule),
	)?;
	let res = load_impl(&parser, &map, base, name);
	match res {
		Ok(module) => {
			MODULES.lock().push(module)?;
			Ok(())
		}
		Err(e) => {
			unsafe {
				arena::free_mapped_range(Arena::Kmodule, base, pages);
			}
			Err(e)
		}
	}
}

fn load_impl(
	parser: &ElfParser,
	map: &SectionMap,
	base: VirtAddr,
	name: &[u8],
) -> EResult<Module> {
	// Copy section content
	for (i, section) in parser.sections().enumerate() {
		let off = map.offsets[i];
		if off == usize::MAX {
			continue;
		}
		let dst = (base + off).as_ptr::<u8>();
		let size = section.sh_size as usize;
		unsafe {
			if section.sh_type == SHT_NOBITS {
				core::ptr::write_bytes(dst, 0, size);
			} else {
				let content = parser
					.section_content(section)
					.ok_or_else(|| errno!(ENOEXEC))?;
				core::ptr::copy_nonoverlapping(content.as_ptr(), dst, size);
			}
		}
	}
	// Locate the symbol table
	let symtab = parser
		.sections()
		.find(|s| s.sh_type == SHT_SYMTAB)
		.ok_or_else(|| errno!(ENOEXEC))?;
	let strtab = parser
		.section(symtab.sh_link as usize)
		.ok_or_else(|| errno!(ENOEXEC))?;
	let symbols_content = parser
		.section_content(symtab)
		.ok_or_else(|| errno!(ENOEXEC))?;
	let sym_at = |index: usize| -> EResult<&Elf64Sym> {
		let begin = index * size_of::<Elf64Sym>();
		from_bytes(&symbols_content[begin..]).ok_or_else(|| errno!(ENOEXEC))
	};
	// Apply relocations
	for section in parser.sections().filter(|s| s.sh_type == SHT_RELA) {
		let target = section.sh_info as usize;
		let target_off = map
			.offsets
			.get(target)
			.copied()
			.ok_or_else(|| errno!(ENOEXEC))?;
		if target_off == usize::MAX {
			continue;
		}
		let content = parser
			.section_content(section)
			.ok_or_else(|| errno!(ENOEXEC))?;
		let count = content.len() / size_of::<Elf64Rela>();
		for i in 0..count {
			let rela: &Elf64Rela = from_bytes(&content[i * size_of::<Elf64Rela>()..])
				.ok_or_else(|| errno!(ENOEXEC))?;
			let sym = sym_at(rela.symbol() as usize)?;
			let value = resolve_symbol(parser, map, base, strtab, sym)?;
			apply_rela(base, target_off, rela, value)?;
		}
	}
	// Locate the entry points
	let mut init = None;
	let mut cleanup = None;
	let count = symbols_content.len() / size_of::<Elf64Sym>();
	for i in 0..count {
		let sym = sym_at(i)?;
		let Some(sym_name) = parser.string_at(strtab, sym.st_name as usize) else {
			continue;
		};
		if sym_name == INIT_SYM {
			init = Some(resolve_symbol(parser, map, base, strtab, sym)?);
		} else if sym_name == CLEANUP_SYM {
			cleanup = Some(resolve_symbol(parser, map, base, strtab, sym)?);
		}
	}
	let init = init.ok_or_else(|| errno!(ENOEXEC))?;
	let module = Module {
		name: String::try_from(name)?,
		mem: base,
		pages: map.total.div_ceil(PAGE_SIZE),
		cleanup,
	};
	// Call the initialization entry point
	let init_fn = unsafe { core::mem::transmute::<usize, extern "C" fn() -> i32>(init) };
	let status = init_fn();
	if status != 0 {
		return Err(errno!(EINVAL));
	}
	println!("loaded kernel module: {}", module.name);
	Ok(module)
}

/// Unloads the module with the given name, calling its `cleanup` entry point.
pub fn unload(name: &[u8]) -> EResult<()> {
	let mut modules = MODULES.lock();
	let i = modules
		.iter()
		.position(|m| m.name == *name)
		.ok_or_else(|| errno!(ENOENT))?;
	let module = modules.remove(i);
	if let Some(cleanup) = module.cleanup {
		let cleanup_fn = unsafe { core::mem::transmute::<usize, extern "C" fn()>(cleanup) };
		cleanup_fn();
	}
	unsafe {
		arena::free_mapped_range(Arena::Kmodule, module.mem, module.pages);
	}
	println!("unloaded kernel module: {}", module.name);
	Ok(())
}

/// Tells whether the module with the given name is loaded.
pub fn is_loaded(name: &[u8]) -> bool {
	MODULES.lock().iter().any(|m| m.name == *name)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::elf::{Elf64Ehdr, ELFCLASS64, ELFDATA2LSB, ELF_MAGIC};

	#[test_case]
	fn module_reject_non_rel() {
		let mut e_ident = [0u8; 16];
		e_ident[..4].copy_from_slice(ELF_MAGIC);
		e_ident[4] = ELFCLASS64;
		e_ident[5] = ELFDATA2LSB;
		let hdr = Elf64Ehdr {
			e_ident,
			e_type: elf::ET_EXEC,
			e_machine: 0x3e,
			e_version: 1,
			e_entry: 0,
			e_phoff: 0,
			e_shoff: 0,
			e_flags: 0,
			e_ehsize: size_of::<Elf64Ehdr>() as u16,
			e_phentsize: 0,
			e_phnum: 0,
			e_shentsize: size_of::<Elf64Shdr>() as u16,
			e_shnum: 0,
			e_shstrndx: 0,
		};
		let image = utils::bytes::as_bytes(&hdr);
		assert_eq!(load(b"bad", image).unwrap_err(), errno!(ENOEXEC));
		assert!(!is_loaded(b"bad"));
	}

	#[test_case]
	fn module_rela_apply() {
		// A direct 64-bit relocation at offset 8
		let mut buf = [0u8; 16];
		let base = VirtAddr::from(buf.as_mut_ptr());
		let rela = Elf64Rela {
			r_offset: 8,
			r_info: R_X86_64_64 as u64,
			r_addend: 4,
		};
		apply_rela(base, 0, &rela, 0x1000).unwrap();
		assert_eq!(u64::from_ne_bytes(buf[8..16].try_into().unwrap()), 0x1004);
	}
}
