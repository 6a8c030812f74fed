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

//! The kernel's own symbol table, used to resolve symbols when linking kernel modules.

use crate::sync::{mutex::Mutex, once::OnceInit};
use utils::{
	collections::{string::String, vec::Vec},
	errno::EResult,
};

/// A kernel symbol.
#[derive(Debug)]
pub struct KernelSym {
	/// The name of the symbol.
	pub name: String,
	/// The address of the symbol.
	pub addr: usize,
}

/// The kernel symbol table, sorted by name.
static SYMBOLS: OnceInit<Mutex<Vec<KernelSym>>> = unsafe { OnceInit::new() };

/// Initializes the kernel symbol table.
///
/// The table starts empty: the kernel registers its exported symbols with [`register`] as
/// subsystems come up, and the boot loader may provide the full symbol table of the kernel
/// image.
pub(crate) fn init() -> EResult<()> {
	unsafe {
		OnceInit::init(&SYMBOLS, Mutex::new(Vec::new()));
	}
	Ok(())
}

/// Registers the symbol `name` at `addr`.
pub fn register(name: &[u8], addr: usize) -> EResult<()> {
	let mut symbols = SYMBOLS.get().lock();
	let i = symbols
		.binary_search_by(|s| s.name.as_bytes().cmp(name))
		.unwrap_or_else(|i| i);
	symbols.insert(
		i,
		KernelSym {
			name: String::try_from(name)?,
			addr,
		},
	)?;
	Ok(())
}

/// Resolves the symbol `name`, returning its address.
pub fn resolve(name: &[u8]) -> Option<usize> {
	let symbols = SYMBOLS.get().lock();
	let i = symbols
		.binary_search_by(|s| s.name.as_bytes().cmp(name))
		.ok()?;
	Some(symbols[i].addr)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn ksym_register_resolve() {
		register(b"test_symbol_a", 0xffff800000001000).unwrap();
		register(b"test_symbol_b", 0xffff800000002000).unwrap();
		assert_eq!(resolve(b"test_symbol_a"), Some(0xffff800000001000));
		assert_eq!(resolve(b"test_symbol_b"), Some(0xffff800000002000));
		assert_eq!(resolve(b"missing"), None);
	}
}
