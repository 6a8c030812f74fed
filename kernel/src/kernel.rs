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

//! Sonata is a Unix-like kernel written in Rust. This reference documents interfaces for modules
//! and the kernel's internals.
//!
//! # Features
//!
//! The crate has the following features:
//! - `strace`: if enabled, the kernel traces system calls. This is a debug feature.

#![no_std]
#![feature(abi_x86_interrupt)]
#![feature(allocator_api)]
#![feature(arbitrary_self_types)]
#![feature(custom_test_frameworks)]
#![feature(likely_unlikely)]
#![feature(negative_impls)]
#![deny(missing_docs)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(dead_code)]
#![allow(internal_features)]
#![allow(unsafe_op_in_unsafe_fn)]
#![test_runner(crate::selftest::runner)]
#![reexport_test_harness_main = "kernel_selftest"]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod device;
pub mod elf;
pub mod file;
pub mod ipc;
pub mod logger;
pub mod memory;
pub mod module;
pub mod panic;
#[macro_use]
pub mod print;
pub mod process;
pub mod selftest;
pub mod sync;
pub mod syscall;
pub mod time;

use crate::{
	file::vfs,
	process::{exec, exec::vdso, scheduler, Process},
};
pub use utils;
use utils::{
	collections::{path::Path, string::String},
	errno::EResult,
	vec,
};

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The path to the init process binary.
const INIT_PATH: &[u8] = b"/sbin/init";

/// Launches the init process.
///
/// On success, the function does not return: control is handed over to userspace.
fn init(init_path: String) -> EResult<()> {
	let path = Path::new(&*init_path)?;
	let node = vfs::node_from_path(path)?;
	let argv = vec![init_path]?;
	let envp = vec![String::try_from(b"PATH=/bin:/sbin:/usr/bin:/usr/sbin")?]?;
	let proc = Process::init()?;
	let image = exec::build_image(&proc, node, argv, envp)?;
	exec::exec(&proc, image)?;
	scheduler::enter_user(&proc)
}

/// The main function of the kernel, responsible for the initialization of every subsystem, in
/// dependency order.
///
/// `boot_info` is the information provided by the bootloader.
pub extern "C" fn kernel_main(boot_info: &'static boot::BootInfo) -> ! {
	boot::init(boot_info);
	// Architecture-specific initialization
	arch::x86::init();

	println!("Boot {NAME} version {VERSION}");

	// Initialize memory management
	println!("Setup memory management");
	memory::frame::init(boot_info);
	memory::vmem::init();
	memory::arena::init();

	// From now on, the kernel considers that memory management has been fully initialized

	// Init kernel symbols map, for the module loader
	elf::kernel::init().expect("cannot initialize kernel symbols map");

	// Perform kernel self-tests
	#[cfg(test)]
	kernel_selftest();

	println!("Setup time management");
	time::init().expect("time management initialization failed");

	println!("Setup devices management");
	device::init().expect("devices management initialization failed");

	println!("Setup files management");
	file::init(boot_info.root_dev).expect("files management initialization failed");

	println!("Setup processes");
	process::init().expect("processes initialization failed");
	vdso::init().expect("vDSO loading failed");

	let init_path = boot_info.init_path.unwrap_or(INIT_PATH);
	let init_path = String::try_from(init_path).unwrap();
	println!("Execute init process ({init_path})");
	init(init_path).expect("init process execution failed");
	// `init` returns only on error
	unreachable!();
}
