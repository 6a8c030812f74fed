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

//! Program execution.
//!
//! Executing a program replaces the whole userspace of the calling task: peer threads are
//! terminated, the memory regions are detached, the new program is loaded and the initial
//! stack is built.

pub mod elf;
pub mod vdso;

use crate::{
	file::{fd::OpenFile, mountpoint, Node, S_IFREG, S_ISGID, S_ISUID},
	memory::VirtAddr,
	process,
	process::{
		mem_space,
		mem_space::{MemSpace, RegionType, MAP_PRIVATE, PROT_READ, PROT_WRITE, STACK_START},
		regs::Regs,
		Process, PROP_TRACE_SIGNALS, PROP_VFORK,
	},
};
use core::sync::atomic::AtomicU64;
use utils::{
	collections::{string::String, vec::Vec},
	errno,
	errno::EResult,
	limits::{ARG_MAX, PAGE_SIZE},
	ptr::arc::Arc,
};

/// The number of pages of the initial userspace stack.
const USER_STACK_PAGES: usize = 256;

/// A program, validated and read, ready to be loaded.
pub struct ProgramImage {
	/// The executable's node.
	pub node: Arc<Node>,
	/// The raw content of the executable.
	pub image: Vec<u8>,
	/// The program's arguments.
	pub argv: Vec<String>,
	/// The program's environment.
	pub envp: Vec<String>,
	/// The absolute path of the executable.
	pub path: String,
}

/// Validates and reads the program at `node`, returning an image ready to be loaded.
///
/// The node must be a regular file, executable by the calling process, on a filesystem that
/// is not mounted `noexec`.
pub fn build_image(
	proc: &Arc<Process>,
	node: Arc<Node>,
	argv: Vec<String>,
	envp: Vec<String>,
) -> EResult<ProgramImage> {
	if node.file_type() != S_IFREG {
		return Err(errno!(EACCES));
	}
	let stat = node.stat();
	if !proc.credentials().can_execute(&stat) {
		return Err(errno!(EACCES));
	}
	if let Some(flags) = mountpoint::get_flags(node.dev) {
		if flags & mountpoint::MS_NOEXEC != 0 {
			return Err(errno!(EACCES));
		}
	}
	let args_len: usize = argv.iter().chain(envp.iter()).map(|s| s.len() + 1).sum();
	if args_len > ARG_MAX {
		return Err(errno!(E2BIG));
	}
	// Read the whole image
	let size = node.size() as usize;
	let mut image = Vec::new();
	image.resize(size, 0u8)?;
	let file = OpenFile {
		node: node.clone(),
		off: AtomicU64::new(0),
		flags: 0,
	};
	let mut done = 0;
	while done < size {
		let n = file.read(&mut image[done..])?;
		if n == 0 {
			break;
		}
		done += n;
	}
	let path = match argv.first() {
		Some(arg0) => String::try_from(&**arg0)?,
		None => String::new(),
	};
	Ok(ProgramImage {
		node,
		image,
		argv,
		envp,
		path,
	})
}

/// Builds the initial userspace stack.
///
/// From the top of the stack downwards: the argument strings, the environment strings, the
/// auxiliary vector, the environment pointer array, the argument pointer array and the
/// argument count. The function returns the final stack pointer.
fn build_stack(
	space: &Arc<MemSpace>,
	image: &ProgramImage,
	auxv: &[(usize, usize)],
) -> EResult<VirtAddr> {
	// Map the stack region, below `STACK_START`
	let stack_bottom = VirtAddr(STACK_START.0 - USER_STACK_PAGES * PAGE_SIZE);
	space.map(
		stack_bottom,
		USER_STACK_PAGES,
		PROT_READ | PROT_WRITE,
		RegionType::Stack,
		MAP_PRIVATE | mem_space::MAP_ANONYMOUS | mem_space::MAP_FIXED,
		None,
		0,
		0,
		false,
	)?;
	let mut sp = STACK_START;
	// Copy a string to the stack, returning its address
	let mut push_str = |sp: &mut VirtAddr, s: &[u8]| -> EResult<usize> {
		*sp = *sp - (s.len() + 1);
		space.write_user(*sp, s)?;
		space.write_user(*sp + s.len(), &[0])?;
		Ok(sp.0)
	};
	let mut argv_ptrs = Vec::with_capacity(image.argv.len() + 1)?;
	for arg in image.argv.iter() {
		argv_ptrs.push(push_str(&mut sp, arg)?)?;
	}
	argv_ptrs.push(0)?;
	let mut envp_ptrs = Vec::with_capacity(image.envp.len() + 1)?;
	for env in image.envp.iter() {
		envp_ptrs.push(push_str(&mut sp, env)?)?;
	}
	envp_ptrs.push(0)?;
	let execfn = push_str(&mut sp, &image.path)?;
	// Align the stack, accounting for the words pushed below
	let words = 1 + argv_ptrs.len() + envp_ptrs.len() + (auxv.len() + 1) * 2;
	sp = VirtAddr(sp.0 & !0xf);
	if words % 2 != 0 {
		sp = sp - 8;
	}
	let mut push_word = |sp: &mut VirtAddr, word: usize| -> EResult<()> {
		*sp = *sp - 8;
		space.write_user(*sp, &word.to_ne_bytes())
	};
	// Auxiliary vector, terminated by AT_NULL
	push_word(&mut sp, 0)?;
	push_word(&mut sp, crate::elf::AT_NULL)?;
	for (id, val) in auxv.iter().rev() {
		let val = if *id == crate::elf::AT_EXECFN {
			execfn
		} else {
			*val
		};
		push_word(&mut sp, val)?;
		push_word(&mut sp, *id)?;
	}
	// Environment and argument pointer arrays, then the argument count
	for ptr in envp_ptrs.iter().rev() {
		push_word(&mut sp, *ptr)?;
	}
	for ptr in argv_ptrs.iter().rev() {
		push_word(&mut sp, *ptr)?;
	}
	push_word(&mut sp, image.argv.len())?;
	Ok(sp)
}

/// Executes the program `image` in the given process.
///
/// On success, the process's registers are set to enter the new program.
pub fn exec(proc: &Arc<Process>, image: ProgramImage) -> EResult<()> {
	// Terminate peer threads and wait for them
	proc.kill_peer_threads();
	// Detach the previous userspace. A vfork child borrows its parent's memory space and must
	// leave it intact: it gets a fresh one instead
	let space = if proc.props() & PROP_VFORK != 0 {
		MemSpace::new()?
	} else {
		match proc.mem_space() {
			Some(space) if Arc::strong_count(&space) <= 2 => {
				space.clear();
				space
			}
			_ => MemSpace::new()?,
		}
	};
	proc.set_mem_space(Some(space.clone()));
	// Load the program
	let load_info = elf::load(&space, &image, false)?;
	// Honor the set-user-ID and set-group-ID bits
	let stat = image.node.stat();
	let nosuid = mountpoint::get_flags(image.node.dev)
		.map(|f| f & mountpoint::MS_NOSUID != 0)
		.unwrap_or(false);
	let traced = proc.props() & PROP_TRACE_SIGNALS != 0;
	if !nosuid && !traced {
		if stat.mode & S_ISUID != 0 {
			proc.set_credentials(|creds| creds.euid = stat.uid);
		}
		if stat.mode & S_ISGID != 0 {
			proc.set_credentials(|creds| creds.egid = stat.gid);
		}
	}
	// Map the vDSO and build the auxiliary vector
	let vdso_addr = vdso::map(&space)?;
	let auxv = [
		(crate::elf::AT_PHDR, load_info.phdr.0),
		(crate::elf::AT_PHENT, core::mem::size_of::<crate::elf::Elf64Phdr>()),
		(crate::elf::AT_PHNUM, load_info.phnum),
		(crate::elf::AT_PAGESZ, PAGE_SIZE),
		(crate::elf::AT_BASE, load_info.interp_base.0),
		(crate::elf::AT_ENTRY, load_info.prog_entry.0),
		(crate::elf::AT_EXECFN, 0),
		(crate::elf::AT_SYSINFO_EHDR, vdso_addr.0),
	];
	let sp = build_stack(&space, &image, &auxv)?;
	// Reset the signal state; ignored dispositions survive
	proc.reset_signals_for_exec()?;
	// Close the descriptors marked close-on-exec
	if let Some(fds) = proc.fd_table() {
		fds.lock().close_on_exec();
	}
	// Record the new executable
	proc.set_exe(image.node.dev, image.node.inode);
	let comm = image
		.path
		.as_bytes()
		.rsplit(|b| *b == b'/')
		.next()
		.unwrap_or(b"");
	proc.set_comm(String::try_from(comm)?);
	// A vfork parent can resume once the child has executed a program
	proc.clear_props(PROP_VFORK);
	if let Some(parent) = process::get_by_pid(proc.parent_pid()) {
		parent.wake();
	}
	// Enter the new program
	*proc.regs.lock() = Regs {
		rip: load_info.entry.0,
		rsp: sp.0,
		rflags: 0x202,
		..Default::default()
	};
	Ok(())
}
