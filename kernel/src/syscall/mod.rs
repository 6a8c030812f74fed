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

//! System calls.
//!
//! The caller passes up to six arguments in registers, following the x86-64 convention. The
//! return value is passed back in `rax`; a negative value in the range of valid errnos means
//! the call failed.

mod _exit;
mod brk;
mod clock_gettime;
mod clone;
mod close;
mod execve;
mod fork;
mod getpid;
mod getppid;
mod gettid;
mod ioctl;
mod kill;
mod mmap;
mod mount;
mod mprotect;
mod mremap;
mod msync;
mod munmap;
mod nanosleep;
mod open;
mod pause;
mod read;
mod sched_yield;
mod semctl;
mod semget;
mod semop;
mod umount2;
mod vfork;
mod wait4;
mod write;

use crate::process::{regs::Regs, scheduler, signal::DefaultAction, Process};
use _exit::{_exit, exit_group};
use brk::brk;
use clock_gettime::clock_gettime;
use clone::clone;
use close::close;
use core::{arch::naked_asm, mem::size_of};
use execve::execve;
use fork::fork;
use getpid::getpid;
use getppid::getppid;
use gettid::gettid;
use ioctl::ioctl;
use kill::kill;
use mmap::mmap;
use mount::mount;
use mprotect::mprotect;
use mremap::mremap;
use msync::msync;
use munmap::munmap;
use nanosleep::nanosleep;
use open::open;
use pause::pause;
use read::read;
use sched_yield::sched_yield;
use semctl::semctl;
use semget::semget;
use semop::semop;
use umount2::umount2;
use utils::{errno, errno::EResult};
use vfork::vfork;
use wait4::wait4;
use write::write;

/// Extracts a value from a raw system call argument.
pub trait FromSyscallArg {
	/// Constructs the value from the given register value.
	fn from_syscall_arg(arg: usize) -> Self;
}

macro_rules! impl_from_syscall_arg_primitive {
	($type:ident) => {
		impl FromSyscallArg for $type {
			fn from_syscall_arg(arg: usize) -> Self {
				arg as _
			}
		}
	};
}

impl_from_syscall_arg_primitive!(i32);
impl_from_syscall_arg_primitive!(u32);
impl_from_syscall_arg_primitive!(i64);
impl_from_syscall_arg_primitive!(u64);
impl_from_syscall_arg_primitive!(usize);
impl_from_syscall_arg_primitive!(isize);

impl FromSyscallArg for crate::memory::VirtAddr {
	fn from_syscall_arg(arg: usize) -> Self {
		Self(arg)
	}
}

/// A system call handler.
///
/// The trait is implemented for every function whose arguments all implement
/// [`FromSyscallArg`], so that handlers take their arguments directly instead of the
/// process's registers.
pub trait SyscallHandler<Args> {
	/// Calls the handler with arguments extracted from `regs`.
	fn call(self, regs: &Regs) -> EResult<usize>;
}

macro_rules! impl_syscall_handler {
	($($ty:ident),*) => {
		impl<F, $($ty,)*> SyscallHandler<($($ty,)*)> for F
		where
			F: FnOnce($($ty,)*) -> EResult<usize>,
			$($ty: FromSyscallArg,)*
		{
			#[allow(non_snake_case, unused_variables, unused_mut, unused_assignments)]
			fn call(self, regs: &Regs) -> EResult<usize> {
				let mut cursor = 0;
				$(
					let $ty = $ty::from_syscall_arg(regs.syscall_arg(cursor));
					cursor += 1;
				)*
				self($($ty,)*)
			}
		}
	};
}

impl_syscall_handler!();
impl_syscall_handler!(T1);
impl_syscall_handler!(T1, T2);
impl_syscall_handler!(T1, T2, T3);
impl_syscall_handler!(T1, T2, T3, T4);
impl_syscall_handler!(T1, T2, T3, T4, T5);
impl_syscall_handler!(T1, T2, T3, T4, T5, T6);

/// Dispatches a system call by number.
macro_rules! syscall {
	($name:ident, $regs:expr) => {{
		#[cfg(feature = "strace")]
		crate::println!("[strace] pid {}: {}", Process::current().pid, stringify!($name));
		SyscallHandler::call($name, $regs)
	}};
}

/// Executes the system call with the given number.
///
/// An unknown number fails with [`errno::ENOSYS`].
fn dispatch(id: usize, regs: &Regs) -> EResult<usize> {
	match id {
		0x000 => syscall!(read, regs),
		0x001 => syscall!(write, regs),
		0x002 => syscall!(open, regs),
		0x003 => syscall!(close, regs),
		0x009 => syscall!(mmap, regs),
		0x00a => syscall!(mprotect, regs),
		0x00b => syscall!(munmap, regs),
		0x00c => syscall!(brk, regs),
		0x010 => syscall!(ioctl, regs),
		0x018 => syscall!(sched_yield, regs),
		0x019 => syscall!(mremap, regs),
		0x01a => syscall!(msync, regs),
		0x022 => syscall!(pause, regs),
		0x023 => syscall!(nanosleep, regs),
		0x027 => syscall!(getpid, regs),
		0x038 => syscall!(clone, regs),
		0x039 => syscall!(fork, regs),
		0x03a => syscall!(vfork, regs),
		0x03b => syscall!(execve, regs),
		0x03c => syscall!(_exit, regs),
		0x03d => syscall!(wait4, regs),
		0x03e => syscall!(kill, regs),
		0x040 => syscall!(semget, regs),
		0x041 => syscall!(semop, regs),
		0x042 => syscall!(semctl, regs),
		0x06e => syscall!(getppid, regs),
		0x0a5 => syscall!(mount, regs),
		0x0a6 => syscall!(umount2, regs),
		0x0ba => syscall!(gettid, regs),
		0x0e4 => syscall!(clock_gettime, regs),
		0x0e7 => syscall!(exit_group, regs),
		_ => Err(errno!(ENOSYS)),
	}
}

/// Delivers pending signals before returning to userspace.
///
/// Signals whose default action terminates the process are acted upon here; caught signals
/// divert execution to the registered userspace handler.
fn deliver_signals(proc: &utils::ptr::arc::Arc<Process>, regs: &mut Regs) {
	use crate::process::signal::{SIG_DFL, SIG_IGN};
	while let Some(sig) = proc.next_pending_signal() {
		let action = proc.signal_handlers().lock().get(sig);
		match action.handler {
			SIG_DFL => match sig.default_action() {
				DefaultAction::Terminate | DefaultAction::Core => {
					proc.exit(sig.id(), true);
				}
				DefaultAction::Stop => {
					proc.set_state(crate::process::State::Stopped);
					scheduler::schedule();
				}
				DefaultAction::Continue | DefaultAction::Ignore => {}
			},
			SIG_IGN => {}
			handler => {
				// Divert execution to the userspace handler. The previous context is pushed
				// on the user stack for the signal trampoline
				regs.rsp -= 128 + size_of::<Regs>();
				let frame = crate::memory::user::UserSlice::from_user(
					regs.rsp,
					size_of::<Regs>(),
				);
				let saved = unsafe {
					core::slice::from_raw_parts(
						regs as *const Regs as *const u8,
						size_of::<Regs>(),
					)
				};
				if frame.copy_to_user(saved).is_err() {
					proc.exit(crate::process::signal::Signal::SIGSEGV.id(), true);
					continue;
				}
				regs.rip = handler;
				regs.rdi = sig.id() as usize;
				break;
			}
		}
	}
}

/// The system call handler, called from the interrupt entry stub.
///
/// The call number is in `rax`; the return value (or negated errno) is written back to it.
#[unsafe(no_mangle)]
extern "C" fn syscall_handler(regs: &mut Regs) {
	let id = regs.rax;
	let result = dispatch(id, regs);
	let proc = Process::current();
	// Update the saved registers, so that fork and execve see a coherent state
	{
		let mut saved = proc.regs.lock();
		*saved = regs.clone();
	}
	let ret = match result {
		Ok(val) => val,
		Err(errno) => (-errno.as_int() as isize) as usize,
	};
	regs.set_syscall_return(ret);
	proc.regs.lock().set_syscall_return(ret);
	deliver_signals(&proc, regs);
}

/// The low level entry point of system calls: saves the registers, calls the dispatcher, and
/// restores the (possibly updated) registers before returning to userspace.
#[unsafe(naked)]
pub extern "C" fn syscall_entry() {
	naked_asm!(
		// Reserve space for a `Regs` structure and fill it
		"sub rsp, 152",
		"mov [rsp + 0], rax",
		"mov [rsp + 8], rbx",
		"mov [rsp + 16], rcx",
		"mov [rsp + 24], rdx",
		"mov [rsp + 32], rsi",
		"mov [rsp + 40], rdi",
		"mov [rsp + 48], rbp",
		"mov [rsp + 56], r8",
		"mov [rsp + 64], r9",
		"mov [rsp + 72], r10",
		"mov [rsp + 80], r11",
		"mov [rsp + 88], r12",
		"mov [rsp + 96], r13",
		"mov [rsp + 104], r14",
		"mov [rsp + 112], r15",
		// The interrupt frame sits above the structure: rip, cs, rflags, rsp, ss
		"mov rax, [rsp + 152]",
		"mov [rsp + 120], rax",
		"mov rax, [rsp + 168]",
		"mov [rsp + 128], rax",
		"mov rax, [rsp + 176]",
		"mov [rsp + 136], rax",
		"mov qword ptr [rsp + 144], 0",
		"mov rdi, rsp",
		"call syscall_handler",
		// Write the possibly-updated control registers back into the interrupt frame
		"mov rax, [rsp + 120]",
		"mov [rsp + 152], rax",
		"mov rax, [rsp + 128]",
		"mov [rsp + 168], rax",
		"mov rax, [rsp + 136]",
		"mov [rsp + 176], rax",
		"mov rax, [rsp + 0]",
		"mov rbx, [rsp + 8]",
		"mov rcx, [rsp + 16]",
		"mov rdx, [rsp + 24]",
		"mov rsi, [rsp + 32]",
		"mov rdi, [rsp + 40]",
		"mov rbp, [rsp + 48]",
		"mov r8, [rsp + 56]",
		"mov r9, [rsp + 64]",
		"mov r10, [rsp + 72]",
		"mov r11, [rsp + 80]",
		"mov r12, [rsp + 88]",
		"mov r13, [rsp + 96]",
		"mov r14, [rsp + 104]",
		"mov r15, [rsp + 112]",
		"add rsp, 152",
		"iretq",
	);
}
