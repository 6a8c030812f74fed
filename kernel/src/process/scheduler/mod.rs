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

//! The process scheduler.
//!
//! Each CPU has its own run queue state. The timer interrupt preempts tasks of the `Other`
//! class when their quantum elapses; `Fifo` tasks run until they yield or block. While a
//! context switch is in progress on a CPU, its `busy` flag makes the tick handler skip the
//! scheduler on that CPU.

pub mod switch;

use crate::{
	process,
	process::{Process, State},
	sync::mutex::IntMutex,
};
use core::sync::atomic::{
	AtomicBool, AtomicUsize,
	Ordering::{Acquire, Release},
};
use utils::{collections::vec::Vec, errno, errno::EResult, ptr::arc::Arc};

/// The maximum number of CPUs.
pub const CPUS_MAX: usize = 16;

/// The default quantum of `Other` class tasks, in ticks.
pub const DEFAULT_QUANTUM: u64 = 10;

/// The scheduling class of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedClass {
	/// First-in-first-out: the task is not preempted until it yields or blocks.
	Fifo,
	/// Round-robin with a quantum.
	Other,
}

/// Per-CPU scheduler state.
pub struct Cpu {
	/// The CPU identifier.
	pub id: usize,
	/// The task currently running on the CPU.
	current: IntMutex<Option<Arc<Process>>>,
	/// Set while a context switch is in progress: the tick handler skips the scheduler.
	pub busy: AtomicBool,
}

impl Cpu {
	const fn new(id: usize) -> Self {
		Self {
			id,
			current: IntMutex::new(None),
			busy: AtomicBool::new(false),
		}
	}
}

/// The per-CPU states.
static CPUS: [Cpu; CPUS_MAX] = [
	Cpu::new(0),
	Cpu::new(1),
	Cpu::new(2),
	Cpu::new(3),
	Cpu::new(4),
	Cpu::new(5),
	Cpu::new(6),
	Cpu::new(7),
	Cpu::new(8),
	Cpu::new(9),
	Cpu::new(10),
	Cpu::new(11),
	Cpu::new(12),
	Cpu::new(13),
	Cpu::new(14),
	Cpu::new(15),
];

/// The number of online CPUs.
static ONLINE_CPUS: AtomicUsize = AtomicUsize::new(1);

/// The run queue, shared by every CPU.
static RUN_QUEUE: IntMutex<Vec<Arc<Process>>> = IntMutex::new(Vec::new());

/// The number of tasks in the `Running` state.
static RUNNING_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Returns the identifier of the current CPU.
///
/// The identifier is installed by the scheduler at context-switch time and is the only way to
/// name the current CPU.
#[inline]
fn current_cpu_id() -> usize {
	// Single-CPU bring-up: the APIC identifier read would go here
	0
}

/// Returns the state of the current CPU.
pub fn core_local() -> &'static Cpu {
	&CPUS[current_cpu_id()]
}

/// Tells whether the current CPU is the bootstrap CPU.
pub fn is_bsp() -> bool {
	current_cpu_id() == 0
}

/// Returns the task currently running on the current CPU.
///
/// The returned handle is the only way to name the current task.
pub fn current() -> Option<Arc<Process>> {
	core_local().current.lock().clone()
}

/// Installs `proc` as the current task of the current CPU.
pub(super) fn set_current(proc: Option<Arc<Process>>) -> Option<Arc<Process>> {
	let mut cur = core_local().current.lock();
	core::mem::replace(&mut cur, proc)
}

/// Adds the given task to the run queue.
pub fn enqueue(proc: Arc<Process>) -> EResult<()> {
	RUN_QUEUE.lock().push(proc)?;
	Ok(())
}

/// Removes the given task from the run queue.
pub fn dequeue(proc: &Arc<Process>) {
	let mut queue = RUN_QUEUE.lock();
	if let Some(i) = queue.iter().position(|p| Arc::ptr_eq(p, proc)) {
		queue.remove(i);
	}
}

/// Updates the count of running tasks by `delta`.
pub(super) fn update_running_count(delta: isize) {
	if delta > 0 {
		RUNNING_COUNT.fetch_add(delta as usize, Release);
	} else {
		RUNNING_COUNT.fetch_sub((-delta) as usize, Release);
	}
}

/// Returns the number of tasks in the `Running` state, for the load average.
pub fn running_count() -> usize {
	RUNNING_COUNT.load(Acquire)
}

/// Picks the next task to run on the current CPU.
///
/// `Fifo` tasks take precedence; `Other` tasks are rotated round-robin.
fn pick_next() -> Option<Arc<Process>> {
	let mut queue = RUN_QUEUE.lock();
	// Fifo first
	let fifo = queue
		.iter()
		.position(|p| p.can_run() && p.sched_class() == SchedClass::Fifo);
	let i = fifo.or_else(|| queue.iter().position(|p| p.can_run()))?;
	let proc = queue.remove(i);
	// Rotate to the back of the queue
	let _ = queue.push(proc.clone());
	Some(proc)
}

/// Runs the scheduler on the current CPU: picks the next task and switches to it.
pub fn schedule() {
	let cpu = core_local();
	// A tick may interrupt a switch already in progress
	if cpu.busy.swap(true, Acquire) {
		return;
	}
	loop {
		let prev = current();
		let next = pick_next();
		match (&prev, &next) {
			(Some(prev), Some(next)) if Arc::ptr_eq(prev, next) => {
				cpu.busy.store(false, Release);
				return;
			}
			(_, Some(next)) => {
				let next = next.clone();
				set_current(Some(next.clone()));
				next.reset_quantum();
				cpu.busy.store(false, Release);
				switch::switch_to(prev, next);
				return;
			}
			// Nothing to run but the current task can keep going
			(Some(prev), None) if prev.can_run() => {
				cpu.busy.store(false, Release);
				return;
			}
			// Nothing runnable at all: idle until an interrupt changes the picture
			_ => {
				crate::arch::x86::sti();
				crate::arch::x86::hlt();
			}
		}
	}
}

/// The scheduler tick, called from the timer interrupt.
///
/// The current `Other` task is preempted when its quantum has elapsed.
pub fn tick() {
	let cpu = core_local();
	if cpu.busy.load(Acquire) {
		return;
	}
	let Some(proc) = current() else {
		return;
	};
	if proc.sched_class() == SchedClass::Fifo {
		return;
	}
	if proc.tick_quantum() {
		schedule();
	}
}

/// Makes the current task wait on the given channel.
///
/// The function returns [`errno::EINTR`] if the task was woken by a signal instead of
/// [`wake_channel`].
pub fn block_on(channel: usize) -> EResult<()> {
	let proc = Process::current();
	proc.set_wait_channel(channel);
	proc.set_state(State::Waiting);
	schedule();
	proc.set_wait_channel(0);
	if proc.has_pending_signal() {
		return Err(errno!(EINTR));
	}
	Ok(())
}

/// Makes the current task wait on the given channel, with a timeout in ticks.
///
/// The function returns [`errno::EINTR`] if the task was woken by a signal, and
/// [`errno::ETIMEDOUT`] if the timeout elapsed.
pub fn block_on_timeout(channel: usize, ticks: u64) -> EResult<()> {
	let deadline = crate::time::ticks() + ticks;
	let proc = Process::current();
	// The sleepers queue wakes us at the deadline
	crate::time::sleep_register_ticks(ticks)?;
	proc.set_wait_channel(channel);
	proc.set_state(State::Waiting);
	schedule();
	proc.set_wait_channel(0);
	if proc.has_pending_signal() {
		return Err(errno!(EINTR));
	}
	if crate::time::ticks() >= deadline {
		return Err(errno!(ETIMEDOUT));
	}
	Ok(())
}

/// Wakes every task waiting on the given channel.
pub fn wake_channel(channel: usize) {
	process::for_each(|proc| {
		if proc.wait_channel() == channel {
			proc.wake();
		}
	});
}

/// Enters userspace for the first time, running the current task.
///
/// The function never returns: execution continues in userspace with the task's saved
/// registers.
pub fn enter_user(proc: &Arc<Process>) -> ! {
	if let Some(space) = proc.mem_space() {
		space.bind();
	}
	let regs = proc.regs.lock().clone();
	unsafe {
		switch::iret_to_user(&regs);
	}
}
