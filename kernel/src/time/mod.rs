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

//! Time management.
//!
//! The timer interrupt drives the global tick counter, the monotonic clock (published to the
//! vDSO data page), the load averages, the sleepers queue and the per-task interval timers.

pub mod unit;

use crate::{
	arch::x86,
	process,
	process::pid::Pid,
	sync::mutex::IntMutex,
};
use core::sync::atomic::{
	AtomicU64,
	Ordering::{Acquire, Relaxed, Release},
};
use unit::{Timespec, NSEC_PER_SEC};
use utils::{collections::vec::Vec, errno::EResult};

/// The frequency of the timer interrupt, in hertz.
pub const HZ: u64 = 100;
/// The duration of one tick, in nanoseconds.
pub const NSECS_PER_TICK: u64 = NSEC_PER_SEC / HZ;

/// The interval between load average updates, in ticks.
pub const LOAD_FREQ: u64 = 5 * HZ;
/// Fixed-point shift of the load averages.
pub const FSHIFT: u32 = 11;
/// 1.0 in load average fixed-point.
pub const FIXED_1: u64 = 1 << FSHIFT;
/// Exponential decay constant for the 1-minute load average.
pub const EXP_1: u64 = 1884;
/// Exponential decay constant for the 5-minute load average.
pub const EXP_5: u64 = 2014;
/// Exponential decay constant for the 15-minute load average.
pub const EXP_15: u64 = 2037;

/// The global tick counter, incremented by the BSP only.
static TICKS: AtomicU64 = AtomicU64::new(0);
/// The monotonic clock, seconds part.
static MONO_SEC: AtomicU64 = AtomicU64::new(0);
/// The monotonic clock, nanoseconds part.
static MONO_NSEC: AtomicU64 = AtomicU64::new(0);
/// The startup time, in seconds since the Unix epoch.
static STARTUP_TIME: AtomicU64 = AtomicU64::new(0);
/// The load averages over 1, 5 and 15 minutes, in fixed-point.
static LOADAVG: [AtomicU64; 3] = [
	AtomicU64::new(0),
	AtomicU64::new(0),
	AtomicU64::new(0),
];

/// A task sleeping until a deadline.
struct Sleeper {
	/// The tick at which the task is woken.
	deadline: u64,
	/// The sleeping task.
	pid: Pid,
}

/// The sleepers queue, ordered by deadline.
static SLEEPERS: IntMutex<Vec<Sleeper>> = IntMutex::new(Vec::new());

/// Returns the number of ticks since boot.
pub fn ticks() -> u64 {
	TICKS.load(Acquire)
}

/// Returns the uptime in milliseconds.
pub fn uptime_ms() -> u64 {
	ticks() * (1000 / HZ)
}

/// Returns the monotonic clock value.
///
/// A reader observing a seconds bump always observes the corresponding nanoseconds reset.
pub fn monotonic() -> Timespec {
	loop {
		let sec = MONO_SEC.load(Acquire);
		let nsec = MONO_NSEC.load(Acquire);
		if MONO_SEC.load(Acquire) == sec {
			return Timespec {
				tv_sec: sec as i64,
				tv_nsec: nsec as i64,
			};
		}
	}
}

/// Returns the wall-clock time: the startup epoch plus the monotonic clock.
pub fn realtime() -> Timespec {
	let mut ts = monotonic();
	ts.tv_sec += STARTUP_TIME.load(Relaxed) as i64;
	ts
}

/// Returns the startup time in seconds since the Unix epoch.
pub fn startup_time() -> u64 {
	STARTUP_TIME.load(Relaxed)
}

/// Returns the load averages, in fixed-point (see [`FSHIFT`]).
pub fn loadavg() -> [u64; 3] {
	[
		LOADAVG[0].load(Relaxed),
		LOADAVG[1].load(Relaxed),
		LOADAVG[2].load(Relaxed),
	]
}

/// One step of the exponential decay of a load average.
fn calc_load(load: u64, exp: u64, active: u64) -> u64 {
	(load * exp + active * (FIXED_1 - exp)) >> FSHIFT
}

/// Advances the monotonic clock by one tick.
fn advance_monotonic() {
	let mut nsec = MONO_NSEC.load(Relaxed) + NSECS_PER_TICK;
	if nsec >= NSEC_PER_SEC {
		nsec -= NSEC_PER_SEC;
		// Zero the nanoseconds before bumping the seconds, so that a reader seeing the new
		// seconds cannot see the old nanoseconds
		MONO_NSEC.store(nsec, Release);
		MONO_SEC.fetch_add(1, Release);
	} else {
		MONO_NSEC.store(nsec, Release);
	}
	process::exec::vdso::update_time();
}

/// Registers the current task in the sleepers queue, to be woken after `dur`.
pub fn sleep_register(dur: Timespec) -> EResult<u64> {
	sleep_register_ticks(dur.to_nanos().div_ceil(NSECS_PER_TICK))
}

/// Registers the current task in the sleepers queue, to be woken after `ticks_count` ticks.
pub fn sleep_register_ticks(ticks_count: u64) -> EResult<u64> {
	let deadline = ticks() + ticks_count;
	let pid = process::Process::current().pid;
	let mut sleepers = SLEEPERS.lock();
	let i = sleepers
		.binary_search_by(|s| s.deadline.cmp(&deadline))
		.unwrap_or_else(|i| i);
	sleepers.insert(
		i,
		Sleeper {
			deadline,
			pid,
		},
	)?;
	Ok(deadline)
}

/// Wakes the sleepers whose deadline has passed.
fn wake_sleepers(now: u64) {
	let mut sleepers = SLEEPERS.lock();
	while let Some(first) = sleepers.first() {
		if first.deadline > now {
			break;
		}
		let sleeper = sleepers.remove(0);
		if let Some(proc) = process::get_by_pid(sleeper.pid) {
			proc.wake();
		}
	}
}

/// The timer tick handler.
///
/// On the bootstrap CPU, the function maintains the global counters (ticks, monotonic clock,
/// load averages, sleepers). Per-task accounting (interval timers, CPU time limit) runs on
/// every CPU.
pub fn tick() {
	let bsp = process::scheduler::is_bsp();
	if bsp {
		let now = TICKS.fetch_add(1, Release) + 1;
		advance_monotonic();
		if now % LOAD_FREQ == 0 {
			let active = process::scheduler::running_count() as u64 * FIXED_1;
			for (i, exp) in [EXP_1, EXP_5, EXP_15].into_iter().enumerate() {
				let load = LOADAVG[i].load(Relaxed);
				LOADAVG[i].store(calc_load(load, exp, active), Relaxed);
			}
		}
		wake_sleepers(now);
	}
	process::timer_tick();
}

/// Initializes time management: programs the timer hardware and records the startup time.
pub(crate) fn init() -> EResult<()> {
	STARTUP_TIME.store(crate::boot::info().startup_time, Relaxed);
	// Program the PIT to fire at `HZ`
	let divisor = (1193182 / HZ) as u16;
	unsafe {
		x86::outb(0x43, 0x36);
		x86::outb(0x40, (divisor & 0xff) as u8);
		x86::outb(0x40, (divisor >> 8) as u8);
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn loadavg_decay() {
		// With no active task, the load decays towards zero
		let mut load = 3 * FIXED_1;
		for _ in 0..1000 {
			load = calc_load(load, EXP_1, 0);
		}
		assert_eq!(load, 0);
		// With one active task, the load converges towards 1.0
		let mut load = 0;
		for _ in 0..1000 {
			load = calc_load(load, EXP_1, FIXED_1);
		}
		let one = load >> FSHIFT;
		assert!(one == 0 || one == 1);
		assert!(load > FIXED_1 / 2);
	}

	#[test_case]
	fn monotonic_read_consistent() {
		let a = monotonic();
		let b = monotonic();
		assert!(
			b.tv_sec > a.tv_sec || (b.tv_sec == a.tv_sec && b.tv_nsec >= a.tv_nsec)
		);
	}
}
