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

//! Signals.

use crate::memory::VirtAddr;
use core::mem;
use utils::{errno, errno::EResult, TryClone};

/// The number of signals.
pub const SIGNALS_COUNT: usize = 32;

/// The default signal disposition.
pub const SIG_DFL: usize = 0;
/// The "ignore" signal disposition.
pub const SIG_IGN: usize = 1;

/// A signal.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
	/// Hangup.
	SIGHUP = 1,
	/// Terminal interrupt.
	SIGINT = 2,
	/// Terminal quit.
	SIGQUIT = 3,
	/// Illegal instruction.
	SIGILL = 4,
	/// Trace trap.
	SIGTRAP = 5,
	/// Abort.
	SIGABRT = 6,
	/// Bus error.
	SIGBUS = 7,
	/// Floating point exception.
	SIGFPE = 8,
	/// Kill, cannot be caught nor ignored.
	SIGKILL = 9,
	/// User-defined signal 1.
	SIGUSR1 = 10,
	/// Invalid memory reference.
	SIGSEGV = 11,
	/// User-defined signal 2.
	SIGUSR2 = 12,
	/// Broken pipe.
	SIGPIPE = 13,
	/// Alarm clock.
	SIGALRM = 14,
	/// Termination.
	SIGTERM = 15,
	/// Child terminated or stopped.
	SIGCHLD = 17,
	/// Continue if stopped.
	SIGCONT = 18,
	/// Stop, cannot be caught nor ignored.
	SIGSTOP = 19,
	/// Terminal stop.
	SIGTSTP = 20,
	/// Background read from control terminal.
	SIGTTIN = 21,
	/// Background write to control terminal.
	SIGTTOU = 22,
	/// Urgent data on a socket.
	SIGURG = 23,
	/// CPU time limit exceeded.
	SIGXCPU = 24,
	/// File size limit exceeded.
	SIGXFSZ = 25,
	/// Virtual interval timer expired.
	SIGVTALRM = 26,
	/// Profiling interval timer expired.
	SIGPROF = 27,
	/// Window size change.
	SIGWINCH = 28,
	/// I/O now possible.
	SIGIO = 29,
	/// Power failure.
	SIGPWR = 30,
	/// Bad system call.
	SIGSYS = 31,
}

impl TryFrom<u32> for Signal {
	type Error = utils::errno::Errno;

	fn try_from(id: u32) -> EResult<Self> {
		if matches!(id, 1..=15 | 17..=31) {
			Ok(unsafe { mem::transmute::<u8, Self>(id as u8) })
		} else {
			Err(errno!(EINVAL))
		}
	}
}

/// The default action of a signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DefaultAction {
	/// Terminate the process.
	Terminate,
	/// Terminate the process and dump core.
	Core,
	/// Ignore the signal.
	Ignore,
	/// Stop the process.
	Stop,
	/// Continue the process if stopped.
	Continue,
}

impl Signal {
	/// Returns the signal number.
	pub fn id(self) -> u32 {
		self as u32
	}

	/// Returns the default action of the signal.
	pub fn default_action(self) -> DefaultAction {
		use Signal::*;
		match self {
			SIGCHLD | SIGURG | SIGWINCH | SIGIO | SIGPWR => DefaultAction::Ignore,
			SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGXCPU
			| SIGXFSZ | SIGSYS => DefaultAction::Core,
			SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => DefaultAction::Stop,
			SIGCONT => DefaultAction::Continue,
			_ => DefaultAction::Terminate,
		}
	}

	/// Tells whether the signal can be caught or ignored.
	pub fn can_catch(self) -> bool {
		!matches!(self, Self::SIGKILL | Self::SIGSTOP)
	}
}

/// The disposition of one signal.
#[derive(Clone, Copy, Debug)]
pub struct SigAction {
	/// The handler: [`SIG_DFL`], [`SIG_IGN`] or the address of a userspace function.
	pub handler: usize,
	/// Signals blocked during the execution of the handler.
	pub mask: u64,
	/// Handler flags.
	pub flags: u32,
}

impl Default for SigAction {
	fn default() -> Self {
		Self {
			handler: SIG_DFL,
			mask: 0,
			flags: 0,
		}
	}
}

/// The signal dispositions of a thread group.
#[derive(Clone, Debug, Default)]
pub struct SignalHandlers(pub [SigAction; SIGNALS_COUNT]);

impl SignalHandlers {
	/// Returns the disposition of the given signal.
	pub fn get(&self, sig: Signal) -> SigAction {
		self.0[sig.id() as usize]
	}

	/// Sets the disposition of the given signal.
	pub fn set(&mut self, sig: Signal, action: SigAction) -> EResult<()> {
		if !sig.can_catch() && action.handler != SIG_DFL {
			return Err(errno!(EINVAL));
		}
		self.0[sig.id() as usize] = action;
		Ok(())
	}

	/// Resets dispositions for `execve`: caught signals are reset to the default action,
	/// ignored signals stay ignored.
	pub fn reset_for_exec(&mut self) {
		for action in &mut self.0 {
			if action.handler != SIG_IGN {
				*action = SigAction::default();
			}
		}
	}
}

impl TryClone for SignalHandlers {
	fn try_clone(&self) -> errno::AllocResult<Self> {
		Ok(self.clone())
	}
}

/// Information attached to a signal generated by a kernel fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct SigInfo {
	/// The signal number.
	pub signo: u32,
	/// The cause code.
	pub code: u32,
	/// The faulting address, if relevant.
	pub addr: VirtAddr,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn signal_ids() {
		assert_eq!(Signal::try_from(9).unwrap(), Signal::SIGKILL);
		assert!(Signal::try_from(0).is_err());
		assert!(Signal::try_from(16).is_err());
		assert!(Signal::try_from(32).is_err());
	}

	#[test_case]
	fn signal_reset_for_exec() {
		let mut handlers = SignalHandlers::default();
		handlers
			.set(
				Signal::SIGUSR1,
				SigAction {
					handler: 0xdeadbeef,
					mask: 0,
					flags: 0,
				},
			)
			.unwrap();
		handlers
			.set(
				Signal::SIGINT,
				SigAction {
					handler: SIG_IGN,
					mask: 0,
					flags: 0,
				},
			)
			.unwrap();
		handlers.reset_for_exec();
		// Caught handlers are reset, ignored dispositions are preserved
		assert_eq!(handlers.get(Signal::SIGUSR1).handler, SIG_DFL);
		assert_eq!(handlers.get(Signal::SIGINT).handler, SIG_IGN);
	}

	#[test_case]
	fn signal_uncatchable() {
		let mut handlers = SignalHandlers::default();
		let res = handlers.set(
			Signal::SIGKILL,
			SigAction {
				handler: SIG_IGN,
				mask: 0,
				flags: 0,
			},
		);
		assert!(res.is_err());
	}
}
