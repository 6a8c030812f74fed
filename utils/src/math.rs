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

//! Mathematical utilities.

/// Returns 2 to the power of `n`.
#[inline]
pub const fn pow2(n: usize) -> usize {
	1 << n
}

/// Returns the log base 2 of `n`, rounded down.
///
/// If `n` is zero, the result is undefined.
#[inline]
pub const fn log2(n: usize) -> usize {
	usize::BITS as usize - n.leading_zeros() as usize - 1
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn log2_val() {
		assert_eq!(log2(1), 0);
		assert_eq!(log2(2), 1);
		assert_eq!(log2(4096), 12);
		assert_eq!(log2(4097), 12);
	}
}
