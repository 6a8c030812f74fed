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

//! Time units.

use macros::AnyRepr;

/// A clock identifier: wall-clock time.
pub const CLOCK_REALTIME: u32 = 0;
/// A clock identifier: time since boot, unaffected by time adjustments.
pub const CLOCK_MONOTONIC: u32 = 1;

/// The number of nanoseconds in a second.
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// A point in time, or a duration, with nanosecond precision.
#[repr(C)]
#[derive(AnyRepr, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Timespec {
	/// Seconds.
	pub tv_sec: i64,
	/// Nanoseconds, in `[0, 999999999]`.
	pub tv_nsec: i64,
}

impl Timespec {
	/// Returns the equivalent number of nanoseconds.
	pub fn to_nanos(self) -> u64 {
		self.tv_sec as u64 * NSEC_PER_SEC + self.tv_nsec as u64
	}

	/// Creates a timespec from a number of nanoseconds.
	pub fn from_nanos(nanos: u64) -> Self {
		Self {
			tv_sec: (nanos / NSEC_PER_SEC) as i64,
			tv_nsec: (nanos % NSEC_PER_SEC) as i64,
		}
	}

	/// Tells whether the timespec is valid as a duration.
	pub fn is_valid(&self) -> bool {
		self.tv_sec >= 0 && (0..NSEC_PER_SEC as i64).contains(&self.tv_nsec)
	}
}

/// An interval timer value.
#[repr(C)]
#[derive(AnyRepr, Clone, Copy, Debug, Default)]
pub struct ITimerspec {
	/// The reload value, zero for one-shot timers.
	pub interval: Timespec,
	/// The current value. Zero disarms the timer.
	pub value: Timespec,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn timespec_nanos_roundtrip() {
		let ts = Timespec {
			tv_sec: 3,
			tv_nsec: 500_000_000,
		};
		assert_eq!(Timespec::from_nanos(ts.to_nanos()), ts);
		assert!(ts.is_valid());
		assert!(!Timespec {
			tv_sec: 0,
			tv_nsec: NSEC_PER_SEC as i64,
		}
		.is_valid());
	}
}
