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

//! Kernel panic: the last resort when an invariant has been broken.

use crate::{arch::x86, println};
use core::panic::PanicInfo;

/// Called on kernel panic. Prints the panic message and halts the CPU.
#[panic_handler]
fn panic(panic_info: &PanicInfo) -> ! {
	x86::cli();
	println!("--- KERNEL PANIC ---\n");
	println!("Kernel has been forced to halt due to internal problem, sorry :/");
	if let Some(location) = panic_info.location() {
		println!(
			"Reason: {} (at {}:{})",
			panic_info.message(),
			location.file(),
			location.line()
		);
	} else {
		println!("Reason: {}", panic_info.message());
	}
	println!("If you believe this is a bug on the kernel side, please feel free to report it.");
	loop {
		x86::hlt();
	}
}
