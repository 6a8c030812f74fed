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

//! A process is a task running on the kernel.
//!
//! Processes occupy a fixed-size table. A thread group is a set of tasks sharing a memory
//! space and a file descriptor table; the leader's PID equals the thread group ID. A zombie
//! process retains its exit status until reaped by `wait`.

pub mod exec;
pub mod fault;
pub mod mem_space;
pub mod pid;
pub mod regs;
pub mod scheduler;
pub mod signal;

use crate::{
	device::DeviceID,
	file::{fd::FdTable, perm::AccessProfile, INode},
	memory::{frame, VirtAddr},
	sync::mutex::{IntMutex, Mutex},
	time,
};
use core::{
	mem::size_of,
	sync::atomic::{
		AtomicU32, AtomicU64, AtomicUsize,
		Ordering::{Acquire, Relaxed, Release},
	},
};
use mem_space::MemSpace;
use pid::Pid;
use regs::Regs;
use scheduler::{switch::KernelContext, SchedClass, DEFAULT_QUANTUM};
use signal::{DefaultAction, SigInfo, Signal, SignalHandlers, SIG_DFL, SIG_IGN};
use utils::{
	collections::{string::String, vec::Vec},
	errno,
	errno::{AllocResult, EResult},
	limits::PAGE_SIZE,
	ptr::arc::{Arc, Weak},
	TryClone,
};

/// The maximum number of processes in the table.
pub const TASKS_MAX: usize = 1024;

/// The number of pages of a kernel stack.
const KERNEL_STACK_PAGES: usize = 8;

/// Property: the task is the idle task of a CPU.
pub const PROP_IDLE: u32 = 1 << 0;
/// Property: the task is a vfork child that has not yet executed a program or exited.
pub const PROP_VFORK: u32 = 1 << 1;
/// Property: the task runs a dynamically linked program.
pub const PROP_DYNAMICALLY_LOADED: u32 = 1 << 2;
/// Property: signal delivery is traced.
pub const PROP_TRACE_SIGNALS: u32 = 1 << 3;

/// The state of a process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
	/// The process is currently running on a CPU.
	Running,
	/// The process is waiting for a CPU.
	Ready,
	/// The process is blocked on a wait channel.
	Waiting,
	/// The process sleeps until a deadline.
	Sleeping,
	/// The process has been stopped by a signal.
	Stopped,
	/// The process is terminated and retains its exit status until reaped.
	Zombie,
}

/// Process forking parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForkOptions {
	/// If `true`, the child shares the parent's memory space.
	pub share_memory: bool,
	/// If `true`, the child shares the parent's file descriptor table.
	pub share_fd: bool,
	/// If `true`, the child shares the parent's signal dispositions.
	pub share_sighand: bool,
	/// If `true`, the parent is blocked until the child executes a program or exits. Implies
	/// sharing the memory space.
	pub vfork: bool,
}

/// Signal state of a process.
#[derive(Debug, Default)]
struct SigState {
	/// The set of pending signals.
	pending: u64,
	/// The set of blocked signals.
	blocked: u64,
	/// The alternate signal stack, if any.
	altstack: usize,
	/// Information attached to the last kernel-generated signal.
	info: SigInfo,
}

/// Scheduling state of a process.
#[derive(Debug)]
struct SchedState {
	/// The scheduling class.
	class: SchedClass,
	/// The remaining quantum, in ticks.
	quantum: u64,
}

/// A virtual interval timer, in ticks.
#[derive(Debug, Default)]
struct ITimer {
	/// The remaining time. Zero when disarmed.
	value: u64,
	/// The reload value. Zero for one-shot timers.
	interval: u64,
}

/// A task.
pub struct Process {
	/// The process identifier.
	pub pid: Pid,
	/// The thread group identifier. Equal to `pid` for the group leader.
	pub tgid: Pid,

	/// The parent process.
	parent: Mutex<Option<Weak<Process>>>,
	/// The children of the process.
	children: Mutex<Vec<Pid>>,
	/// The other members of the thread group. Maintained on the leader.
	threads: Mutex<Vec<Pid>>,

	/// The state of the process.
	state: IntMutex<State>,
	/// The wait channel the process is blocked on. Zero when not blocked.
	wait_channel: AtomicUsize,
	/// The properties bitset (`PROP_*`).
	props: AtomicU32,

	/// The memory space of the process. `None` for kernel-only tasks and zombies.
	mem_space: Mutex<Option<Arc<MemSpace>>>,
	/// The base of the kernel stack.
	kernel_stack: VirtAddr,
	/// The saved kernel stack pointer, while the task is suspended.
	kernel_sp: AtomicUsize,
	/// The saved userspace registers.
	pub regs: Mutex<Regs>,

	/// The file descriptor table. `None` for zombies.
	fds: Mutex<Option<Arc<Mutex<FdTable>>>>,

	/// The signal dispositions, shared across the thread group.
	handlers: Mutex<Arc<Mutex<SignalHandlers>>>,
	/// The signal state.
	sig: IntMutex<SigState>,

	/// The credentials of the process.
	creds: Mutex<AccessProfile>,
	/// The scheduling state.
	sched: IntMutex<SchedState>,

	/// The virtual interval timer, decremented while the process runs in userspace.
	itimer_virt: IntMutex<ITimer>,
	/// CPU time consumed, in ticks.
	cpu_ticks: AtomicU64,
	/// CPU time limit in seconds. Zero means no limit.
	rlimit_cpu: AtomicU64,

	/// The executable: device and inode.
	exe: Mutex<Option<(DeviceID, INode)>>,
	/// The command name.
	comm: Mutex<String>,

	/// The wait status, valid while the process is a zombie.
	exit_status: AtomicU32,

	/// The SysV semaphore undo journal, applied at exit.
	pub sem_undo: Mutex<Vec<crate::ipc::sem::UndoEntry>>,
}

/// The process table.
static TASKS: IntMutex<Vec<Option<Arc<Process>>>> = IntMutex::new(Vec::new());

/// Initializes process management.
pub(crate) fn init() -> EResult<()> {
	pid::init()?;
	let mut tasks = TASKS.lock();
	tasks.resize(TASKS_MAX, None)?;
	Ok(())
}

/// Returns the process with the given PID, if any.
pub fn get_by_pid(pid: Pid) -> Option<Arc<Process>> {
	let tasks = TASKS.lock();
	tasks
		.iter()
		.flatten()
		.find(|p| p.pid == pid)
		.cloned()
}

/// Calls `f` on every process of the table.
pub fn for_each<F: FnMut(&Arc<Process>)>(mut f: F) {
	let tasks = TASKS.lock();
	for proc in tasks.iter().flatten() {
		f(proc);
	}
}

/// Inserts the process in the table.
fn insert(proc: Arc<Process>) -> EResult<()> {
	let mut tasks = TASKS.lock();
	let slot = tasks
		.iter_mut()
		.find(|slot| slot.is_none())
		.ok_or_else(|| errno!(EAGAIN))?;
	*slot = Some(proc);
	Ok(())
}

/// Removes the process with the given PID from the table.
fn remove(pid: Pid) {
	let mut tasks = TASKS.lock();
	for slot in tasks.iter_mut() {
		if matches!(slot, Some(p) if p.pid == pid) {
			*slot = None;
			break;
		}
	}
	pid::free(pid);
}

/// Per-task timer accounting, called on every timer tick for the current task.
pub(crate) fn timer_tick() {
	let Some(proc) = scheduler::current() else {
		return;
	};
	proc.cpu_ticks.fetch_add(1, Relaxed);
	// CPU time limit
	let limit = proc.rlimit_cpu.load(Relaxed);
	if limit != 0 && proc.cpu_ticks.load(Relaxed) >= limit * time::HZ {
		proc.kill(Signal::SIGXCPU);
	}
	// Virtual interval timer
	let expired = {
		let mut itimer = proc.itimer_virt.lock();
		if itimer.value == 0 {
			false
		} else {
			itimer.value -= 1;
			if itimer.value == 0 {
				// Reload for periodic timers
				itimer.value = itimer.interval;
				true
			} else {
				false
			}
		}
	};
	if expired {
		proc.kill(Signal::SIGVTALRM);
	}
}

/// Allocates a kernel stack and returns its base address.
fn alloc_kernel_stack() -> AllocResult<VirtAddr> {
	let phys = frame::alloc_frames(KERNEL_STACK_PAGES)?;
	Ok(phys.kernel_to_virtual().unwrap())
}

impl Process {
	/// Returns the current process.
	///
	/// If no process is running on the current CPU, the function panics.
	pub fn current() -> Arc<Self> {
		scheduler::current().expect("no running process")
	}

	/// Returns the current process, or `None` if no process is running on the current CPU.
	pub fn current_opt() -> Option<Arc<Self>> {
		scheduler::current()
	}

	/// Creates the init process.
	///
	/// The process has root credentials, an empty memory space and an empty file descriptor
	/// table. It is inserted in the table and installed as the current task.
	pub fn init() -> EResult<Arc<Self>> {
		let pid = pid::alloc().ok_or_else(|| errno!(EAGAIN))?;
		debug_assert_eq!(pid, pid::INIT_PID);
		let proc = Arc::new(Self {
			pid,
			tgid: pid,
			parent: Mutex::new(None),
			children: Mutex::new(Vec::new()),
			threads: Mutex::new(Vec::new()),
			state: IntMutex::new(State::Running),
			wait_channel: AtomicUsize::new(0),
			props: AtomicU32::new(0),
			mem_space: Mutex::new(Some(MemSpace::new()?)),
			kernel_stack: alloc_kernel_stack()?,
			kernel_sp: AtomicUsize::new(0),
			regs: Mutex::new(Regs::default()),
			fds: Mutex::new(Some(Arc::new(Mutex::new(FdTable::default()))?)),
			handlers: Mutex::new(Arc::new(Mutex::new(SignalHandlers::default()))?),
			sig: IntMutex::new(SigState::default()),
			creds: Mutex::new(AccessProfile::KERNEL),
			sched: IntMutex::new(SchedState {
				class: SchedClass::Other,
				quantum: DEFAULT_QUANTUM,
			}),
			itimer_virt: IntMutex::new(ITimer::default()),
			cpu_ticks: AtomicU64::new(0),
			rlimit_cpu: AtomicU64::new(0),
			exe: Mutex::new(None),
			comm: Mutex::new(String::new()),
			exit_status: AtomicU32::new(0),
			sem_undo: Mutex::new(Vec::new()),
		})?;
		insert(proc.clone())?;
		scheduler::update_running_count(1);
		scheduler::enqueue(proc.clone())?;
		scheduler::set_current(Some(proc.clone()));
		Ok(proc)
	}

	/// Clones the process into a new child.
	///
	/// The child gets a copy of the parent's memory space (Copy-On-Write), file descriptor
	/// table, signal dispositions and credentials, unless `options` requests sharing.
	pub fn fork(self: &Arc<Self>, options: ForkOptions) -> EResult<Arc<Self>> {
		let pid = pid::alloc().ok_or_else(|| errno!(EAGAIN))?;
		// vfork implies sharing the memory space
		let share_memory = options.share_memory || options.vfork;
		let mem_space = {
			let parent_space = self.mem_space.lock();
			let parent_space = parent_space.as_ref().ok_or_else(|| errno!(EINVAL))?;
			if share_memory {
				parent_space.clone()
			} else {
				parent_space.fork()?
			}
		};
		let fds = {
			let parent_fds = self.fds.lock();
			let parent_fds = parent_fds.as_ref().ok_or_else(|| errno!(EINVAL))?;
			if options.share_fd {
				parent_fds.clone()
			} else {
				Arc::new(Mutex::new(parent_fds.lock().duplicate()?))?
			}
		};
		let handlers = {
			let parent_handlers = self.handlers.lock();
			if options.share_sighand {
				parent_handlers.clone()
			} else {
				Arc::new(Mutex::new(parent_handlers.lock().try_clone()?))?
			}
		};
		// A thread joins the parent's group, otherwise the child leads its own
		let tgid = if options.share_memory && !options.vfork {
			self.tgid
		} else {
			pid
		};
		let mut props = 0;
		if options.vfork {
			props |= PROP_VFORK;
		}
		let child = Arc::new(Self {
			pid,
			tgid,
			parent: Mutex::new(Some(Arc::downgrade(self))),
			children: Mutex::new(Vec::new()),
			threads: Mutex::new(Vec::new()),
			state: IntMutex::new(State::Ready),
			wait_channel: AtomicUsize::new(0),
			props: AtomicU32::new(props),
			mem_space: Mutex::new(Some(mem_space)),
			kernel_stack: alloc_kernel_stack()?,
			kernel_sp: AtomicUsize::new(0),
			regs: Mutex::new(self.regs.lock().clone()),
			fds: Mutex::new(Some(fds)),
			handlers: Mutex::new(handlers),
			sig: IntMutex::new(SigState {
				pending: 0,
				blocked: self.sig.lock().blocked,
				altstack: 0,
				info: SigInfo::default(),
			}),
			creds: Mutex::new(self.creds.lock().clone()),
			sched: IntMutex::new(SchedState {
				class: self.sched.lock().class,
				quantum: DEFAULT_QUANTUM,
			}),
			itimer_virt: IntMutex::new(ITimer::default()),
			cpu_ticks: AtomicU64::new(0),
			rlimit_cpu: AtomicU64::new(self.rlimit_cpu.load(Relaxed)),
			exe: Mutex::new(*self.exe.lock()),
			comm: Mutex::new(self.comm.lock().try_clone()?),
			exit_status: AtomicU32::new(0),
			sem_undo: Mutex::new(Vec::new()),
		})?;
		child.prepare_kernel_stack();
		self.children.lock().push(pid)?;
		if tgid != pid {
			// Register the thread on the group leader
			let leader = get_by_pid(tgid).ok_or_else(|| errno!(ESRCH))?;
			leader.threads.lock().push(pid)?;
		}
		insert(child.clone())?;
		scheduler::update_running_count(1);
		scheduler::enqueue(child.clone())?;
		Ok(child)
	}

	/// Builds the initial kernel stack context of the task, so that the first switch to it
	/// lands in the userspace return path.
	fn prepare_kernel_stack(&self) {
		let top = self.kernel_stack + KERNEL_STACK_PAGES * PAGE_SIZE;
		let ctx_addr = top - size_of::<KernelContext>();
		let ctx = ctx_addr.as_ptr::<KernelContext>();
		unsafe {
			*ctx = KernelContext {
				rip: task_entry as usize,
				..Default::default()
			};
		}
		self.kernel_sp.store(ctx_addr.0, Release);
	}

	/// Returns the saved kernel stack pointer.
	pub(crate) fn kernel_sp(&self) -> usize {
		self.kernel_sp.load(Acquire)
	}

	/// Returns a pointer to the kernel stack pointer save slot.
	pub(crate) fn kernel_sp_mut(&self) -> *mut usize {
		self.kernel_sp.as_ptr()
	}

	/// Returns the memory space of the process.
	pub fn mem_space(&self) -> Option<Arc<MemSpace>> {
		self.mem_space.lock().clone()
	}

	/// Replaces the memory space of the process.
	pub fn set_mem_space(&self, space: Option<Arc<MemSpace>>) {
		*self.mem_space.lock() = space;
	}

	/// Returns the file descriptor table of the process.
	pub fn fd_table(&self) -> Option<Arc<Mutex<FdTable>>> {
		self.fds.lock().clone()
	}

	/// Returns the signal dispositions of the process.
	pub fn signal_handlers(&self) -> Arc<Mutex<SignalHandlers>> {
		self.handlers.lock().clone()
	}

	/// Returns the credentials of the process.
	pub fn credentials(&self) -> AccessProfile {
		self.creds.lock().clone()
	}

	/// Updates the credentials of the process.
	pub fn set_credentials<F: FnOnce(&mut AccessProfile)>(&self, f: F) {
		f(&mut self.creds.lock());
	}

	/// Returns the executable's device and inode.
	pub fn exe(&self) -> Option<(DeviceID, INode)> {
		*self.exe.lock()
	}

	/// Sets the executable's device and inode.
	pub fn set_exe(&self, dev: DeviceID, inode: INode) {
		*self.exe.lock() = Some((dev, inode));
	}

	/// Sets the command name of the process.
	pub fn set_comm(&self, comm: String) {
		*self.comm.lock() = comm;
	}

	/// Returns the state of the process.
	pub fn state(&self) -> State {
		*self.state.lock()
	}

	/// Sets the state of the process, maintaining the count of runnable tasks.
	pub fn set_state(&self, new: State) {
		let mut state = self.state.lock();
		if *state == new || *state == State::Zombie {
			return;
		}
		let was_runnable = matches!(*state, State::Running | State::Ready);
		let is_runnable = matches!(new, State::Running | State::Ready);
		match (was_runnable, is_runnable) {
			(false, true) => scheduler::update_running_count(1),
			(true, false) => scheduler::update_running_count(-1),
			_ => {}
		}
		*state = new;
	}

	/// Tells whether the scheduler can run the process.
	pub fn can_run(&self) -> bool {
		matches!(self.state(), State::Running | State::Ready) && !self.is_vfork_waiting()
	}

	/// Tells whether the process is blocked waiting for a vfork child.
	fn is_vfork_waiting(&self) -> bool {
		let children = self.children.lock();
		children.iter().any(|pid| {
			get_by_pid(*pid)
				.map(|child| child.props.load(Acquire) & PROP_VFORK != 0)
				.unwrap_or(false)
		})
	}

	/// Wakes the process if it is blocked or sleeping.
	pub fn wake(&self) {
		let mut state = self.state.lock();
		if matches!(*state, State::Waiting | State::Sleeping) {
			*state = State::Ready;
			scheduler::update_running_count(1);
		}
	}

	/// Returns the wait channel the process is blocked on.
	pub fn wait_channel(&self) -> usize {
		self.wait_channel.load(Acquire)
	}

	/// Sets the wait channel of the process.
	pub fn set_wait_channel(&self, channel: usize) {
		self.wait_channel.store(channel, Release);
	}

	/// Returns the properties bitset of the process.
	pub fn props(&self) -> u32 {
		self.props.load(Acquire)
	}

	/// Sets the given properties.
	pub fn add_props(&self, props: u32) {
		self.props.fetch_or(props, Release);
	}

	/// Clears the given properties.
	pub fn clear_props(&self, props: u32) {
		self.props.fetch_and(!props, Release);
	}

	/// Returns the scheduling class of the process.
	pub fn sched_class(&self) -> SchedClass {
		self.sched.lock().class
	}

	/// Sets the scheduling class of the process.
	pub fn set_sched_class(&self, class: SchedClass) {
		self.sched.lock().class = class;
	}

	/// Reloads the quantum of the process.
	pub fn reset_quantum(&self) {
		self.sched.lock().quantum = DEFAULT_QUANTUM;
	}

	/// Consumes one tick of the quantum. Returns `true` when the quantum has elapsed.
	pub fn tick_quantum(&self) -> bool {
		let mut sched = self.sched.lock();
		sched.quantum = sched.quantum.saturating_sub(1);
		sched.quantum == 0
	}

	/// Arms the virtual interval timer.
	///
	/// Arguments are in ticks; a zero `value` disarms the timer. The function returns the
	/// previous `(value, interval)` pair.
	pub fn set_itimer_virt(&self, value: u64, interval: u64) -> (u64, u64) {
		let mut itimer = self.itimer_virt.lock();
		let old = (itimer.value, itimer.interval);
		itimer.value = value;
		itimer.interval = interval;
		old
	}

	/// Sends the given signal to the process.
	///
	/// Ignored signals are discarded at once, except `SIGKILL` and `SIGSTOP` which cannot be
	/// ignored. A blocked or sleeping process is woken so that the blocking primitive can
	/// return `EINTR`.
	pub fn kill(&self, sig: Signal) {
		let handlers = self.signal_handlers();
		let action = handlers.lock().get(sig);
		if sig.can_catch() {
			let ignored = action.handler == SIG_IGN
				|| (action.handler == SIG_DFL
					&& sig.default_action() == DefaultAction::Ignore);
			if ignored {
				return;
			}
		}
		self.sig.lock().pending |= 1 << sig.id();
		self.wake();
	}

	/// Tells whether the process has a pending, non-blocked signal.
	pub fn has_pending_signal(&self) -> bool {
		let sig = self.sig.lock();
		sig.pending & !sig.blocked != 0
	}

	/// Returns the set of blocked signals.
	pub fn sigmask(&self) -> u64 {
		self.sig.lock().blocked
	}

	/// Sets the set of blocked signals. `SIGKILL` and `SIGSTOP` cannot be blocked.
	pub fn set_sigmask(&self, mask: u64) {
		let forbidden = (1 << Signal::SIGKILL.id()) | (1 << Signal::SIGSTOP.id());
		self.sig.lock().blocked = mask & !forbidden;
	}

	/// Attaches fault information to the process, for the next signal delivery.
	pub fn set_siginfo(&self, info: SigInfo) {
		self.sig.lock().info = info;
	}

	/// Takes the next pending, non-blocked signal.
	pub fn next_pending_signal(&self) -> Option<Signal> {
		let mut sig = self.sig.lock();
		let avail = sig.pending & !sig.blocked;
		if avail == 0 {
			return None;
		}
		let id = avail.trailing_zeros();
		sig.pending &= !(1 << id);
		Signal::try_from(id).ok()
	}

	/// Resets the signal state for `execve`: caught dispositions are reset to the default
	/// action (ignored ones are preserved), pending and blocked sets are cleared, and the
	/// alternate signal stack is removed.
	pub fn reset_signals_for_exec(&self) -> EResult<()> {
		// The dispositions are no longer shared after exec
		let handlers = {
			let handlers = self.handlers.lock();
			let mut new = handlers.lock().try_clone()?;
			new.reset_for_exec();
			Arc::new(Mutex::new(new))?
		};
		*self.handlers.lock() = handlers;
		let mut sig = self.sig.lock();
		sig.pending = 0;
		sig.blocked = 0;
		sig.altstack = 0;
		Ok(())
	}

	/// Terminates the peer threads of the process and waits for them to exit. Used by
	/// `execve`.
	pub fn kill_peer_threads(self: &Arc<Self>) {
		let leader = if self.tgid == self.pid {
			self.clone()
		} else {
			match get_by_pid(self.tgid) {
				Some(leader) => leader,
				None => return,
			}
		};
		let peers: Vec<Pid> = {
			let threads = leader.threads.lock();
			threads.try_clone().unwrap_or_default()
		};
		for pid in peers.iter() {
			if *pid == self.pid {
				continue;
			}
			if let Some(peer) = get_by_pid(*pid) {
				peer.kill(Signal::SIGKILL);
				peer.do_exit(Signal::SIGKILL.id() + 128, true);
			}
		}
		leader.threads.lock().clear();
	}

	/// Terminates the process with the given status.
	///
	/// Every file descriptor is released, the memory space is detached, children are orphaned
	/// to init, the parent receives `SIGCHLD`, and queued SysV semaphore undo operations are
	/// applied. The process remains a zombie until reaped.
	pub fn exit(self: &Arc<Self>, status: u32, signaled: bool) {
		self.do_exit(status, signaled);
		// Give up the CPU for good
		scheduler::dequeue(self);
		if let Some(cur) = Process::current_opt() {
			if Arc::ptr_eq(&cur, self) {
				scheduler::set_current(None);
				scheduler::schedule();
			}
		}
	}

	fn do_exit(self: &Arc<Self>, status: u32, signaled: bool) {
		if self.pid == pid::INIT_PID {
			panic!("init process terminated with status {status}");
		}
		// Apply the semaphore undo journal
		crate::ipc::sem::apply_undo(self);
		// Release the file descriptors and the memory space
		*self.fds.lock() = None;
		*self.mem_space.lock() = None;
		// Orphan children to init
		let init = get_by_pid(pid::INIT_PID);
		let children = core::mem::take(&mut *self.children.lock());
		if let Some(init) = &init {
			for pid in children.iter() {
				if let Some(child) = get_by_pid(*pid) {
					*child.parent.lock() = Some(Arc::downgrade(init));
					let _ = init.children.lock().push(*pid);
				}
			}
		}
		let status = if signaled {
			status & 0x7f
		} else {
			(status & 0xff) << 8
		};
		self.exit_status.store(status, Release);
		self.set_state(State::Zombie);
		// A vfork parent waiting on us can resume
		self.clear_props(PROP_VFORK);
		// Notify the parent
		let parent = self.parent.lock().as_ref().and_then(Weak::upgrade);
		if let Some(parent) = parent {
			parent.kill(Signal::SIGCHLD);
			parent.wake();
		}
	}

	/// Returns the wait status of the process, valid for zombies.
	pub fn wait_status(&self) -> u32 {
		self.exit_status.load(Acquire)
	}

	/// Reaps the zombie process: removes it from the table and frees its PID.
	pub fn reap(self: &Arc<Self>) {
		debug_assert_eq!(self.state(), State::Zombie);
		remove(self.pid);
	}

	/// Returns the PID of the parent process, or the process's own PID if it has none.
	pub fn parent_pid(&self) -> Pid {
		self.parent
			.lock()
			.as_ref()
			.and_then(Weak::upgrade)
			.map(|p| p.pid)
			.unwrap_or(self.pid)
	}

	/// Returns a copy of the children PIDs.
	pub fn children_pids(&self) -> Vec<Pid> {
		self.children.lock().try_clone().unwrap_or_default()
	}

	/// Removes the given child PID from the children list.
	pub fn forget_child(&self, pid: Pid) {
		let mut children = self.children.lock();
		if let Some(i) = children.iter().position(|p| *p == pid) {
			children.remove(i);
		}
	}
}

impl Drop for Process {
	fn drop(&mut self) {
		let phys = self.kernel_stack.kernel_to_physical().unwrap();
		unsafe {
			frame::free_frames(phys, KERNEL_STACK_PAGES);
		}
	}
}

/// The entry point of newly created tasks: returns to userspace with the task's saved
/// registers.
extern "C" fn task_entry() -> ! {
	let proc = Process::current();
	scheduler::enter_user(&proc)
}
