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

//! The kernel logger, writing to the serial console.

use crate::{arch::x86, sync::mutex::IntMutex};
use core::fmt;

/// The COM1 serial port.
const SERIAL_PORT: u16 = 0x3f8;

/// The kernel logger.
pub struct Logger {
	/// Tells whether the logger is silenced. Messages are still kept in the buffer.
	pub silent: bool,
}

impl Logger {
	/// Writes a single byte to the serial console.
	fn putc(&self, b: u8) {
		unsafe {
			// Wait for the transmit buffer to be empty
			while x86::inb(SERIAL_PORT + 5) & 0x20 == 0 {}
			x86::outb(SERIAL_PORT, b);
		}
	}
}

impl fmt::Write for Logger {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		if self.silent {
			return Ok(());
		}
		for b in s.bytes() {
			if b == b'\n' {
				self.putc(b'\r');
			}
			self.putc(b);
		}
		Ok(())
	}
}

/// The global kernel logger instance.
pub static LOGGER: IntMutex<Logger> = IntMutex::new(Logger {
	silent: false,
});
