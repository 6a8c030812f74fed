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

//! Kernel self-tests, run at boot when the kernel is built in test mode.

use crate::println;

/// A unit test, printing its own name when run.
pub trait Testable {
	/// Runs the test.
	fn run(&self);
}

impl<T: Fn()> Testable for T {
	fn run(&self) {
		crate::print!("{}... ", core::any::type_name::<T>());
		self();
		println!("ok");
	}
}

/// The entry point of the kernel's test framework.
pub fn runner(tests: &[&dyn Testable]) {
	println!("Running {} tests", tests.len());
	for test in tests {
		test.run();
	}
	println!("Done!");
}
