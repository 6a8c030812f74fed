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

//! System V semaphores.
//!
//! A semaphore set is identified by its key and a generation counter. The generation makes
//! stale references to a recycled slot detectable: an undo journal entry recorded against a
//! removed set has no effect, and a task blocked on a removed set wakes up with `EIDRM`.
//!
//! A `semop` batch is atomic per set: either every operation applies, or the operations
//! already applied are reversed before the task blocks or fails.

use super::{IpcPerm, IPC_CREAT, IPC_EXCL, IPC_NOWAIT, IPC_PRIVATE, IPC_RMID, IPC_SET, IPC_STAT};
use crate::{
	process::{pid::Pid, scheduler, Process},
	sync::mutex::Mutex,
};
use macros::AnyRepr;
use utils::{
	collections::vec::Vec,
	errno,
	errno::EResult,
	limits::{SEMOPM, SEMVMX},
	ptr::arc::Arc,
};

/// The maximum number of semaphore sets.
pub const SEMMNI: usize = 128;

/// `semctl` command: get the value of a semaphore.
pub const GETVAL: i32 = 12;
/// `semctl` command: get the values of every semaphore of the set.
pub const GETALL: i32 = 13;
/// `semctl` command: get the PID of the last operation on a semaphore.
pub const GETPID: i32 = 11;
/// `semctl` command: get the number of tasks waiting for a semaphore to grow.
pub const GETNCNT: i32 = 14;
/// `semctl` command: get the number of tasks waiting for a semaphore to reach zero.
pub const GETZCNT: i32 = 15;
/// `semctl` command: set the value of a semaphore.
pub const SETVAL: i32 = 16;
/// `semctl` command: set the values of every semaphore of the set.
pub const SETALL: i32 = 17;

/// `semop` flag: record the operation in the task's undo journal.
pub const SEM_UNDO: i16 = 0x1000;

/// A single semaphore operation.
#[repr(C)]
#[derive(AnyRepr, Clone, Copy, Debug)]
pub struct SemBuf {
	/// The index of the semaphore in the set.
	pub sem_num: u16,
	/// The operation: positive adds, negative waits-and-subtracts, zero waits for zero.
	pub sem_op: i16,
	/// Operation flags: [`SEM_UNDO`], [`IPC_NOWAIT`].
	pub sem_flg: i16,
}

/// One semaphore of a set.
#[derive(Clone, Debug, Default)]
struct Semaphore {
	/// The value of the semaphore.
	semval: i32,
	/// The PID of the last task that operated on the semaphore.
	sempid: Pid,
	/// The number of tasks waiting for the value to grow.
	semncnt: u16,
	/// The number of tasks waiting for the value to reach zero.
	semzcnt: u16,
}

/// A semaphore set.
#[derive(Debug)]
struct SemSet {
	/// The key of the set.
	key: i32,
	/// The generation of the slot holding the set.
	gen: u64,
	/// Ownership and permissions.
	perm: IpcPerm,
	/// The semaphores.
	sems: Vec<Semaphore>,
}

/// A slot of the set table, with its generation counter.
#[derive(Debug, Default)]
struct Slot {
	/// The number of times the slot has been (re)used.
	gen: u64,
	/// The set currently held by the slot.
	set: Option<SemSet>,
}

/// The semaphore set table.
static SETS: Mutex<Vec<Slot>> = Mutex::new(Vec::new());

/// An entry of a task's undo journal.
#[derive(Clone, Copy, Debug)]
pub struct UndoEntry {
	/// The identifier of the set.
	pub id: i32,
	/// The generation of the set when the entry was recorded.
	pub gen: u64,
	/// The index of the semaphore in the set.
	pub index: usize,
	/// The adjustment to apply at task exit.
	pub adj: i32,
}

/// Builds a set identifier from a slot index and generation.
fn make_id(index: usize, gen: u64) -> i32 {
	((gen as i32 & 0x7fff) * SEMMNI as i32) + index as i32
}

/// Returns the slot index of a set identifier.
fn id_index(id: i32) -> usize {
	(id as usize) % SEMMNI
}

/// Locates the set with the given identifier. A recycled or empty slot fails with
/// [`errno::EIDRM`].
fn check_id(slots: &mut [Slot], id: i32) -> EResult<&mut SemSet> {
	if id < 0 {
		return Err(errno!(EINVAL));
	}
	let slot = slots.get_mut(id_index(id)).ok_or_else(|| errno!(EINVAL))?;
	let set = slot.set.as_mut().ok_or_else(|| errno!(EIDRM))?;
	if make_id(id_index(id), set.gen) != id {
		return Err(errno!(EIDRM));
	}
	Ok(set)
}

/// The wait channel of a set. Based on the slot index, so that a waiter blocked on a removed
/// set is still woken.
fn channel(id: i32) -> usize {
	0x53454d00usize ^ id_index(id)
}

/// Grows the slot table to its full size on first use.
fn ensure_slots(slots: &mut Vec<Slot>) -> EResult<()> {
	while slots.len() < SEMMNI {
		slots.push(Slot::default())?;
	}
	Ok(())
}

/// Creates or retrieves the semaphore set with the given key.
///
/// Arguments:
/// - `key` is the key, [`IPC_PRIVATE`] always creating a new set
/// - `nsems` is the number of semaphores, which may be zero when retrieving
/// - `flags` are the IPC flags and the permission bits of a new set
pub fn semget(key: i32, nsems: usize, flags: i32) -> EResult<i32> {
	if nsems > utils::limits::SEMMSL {
		return Err(errno!(EINVAL));
	}
	let proc = Process::current();
	let creds = proc.credentials();
	let mut slots = SETS.lock();
	ensure_slots(&mut slots)?;
	// Look for an existing set
	if key != IPC_PRIVATE {
		let found = slots
			.iter()
			.enumerate()
			.find(|(_, s)| matches!(&s.set, Some(set) if set.key == key));
		if let Some((i, slot)) = found {
			let set = slot.set.as_ref().unwrap();
			if flags & IPC_CREAT != 0 && flags & IPC_EXCL != 0 {
				return Err(errno!(EEXIST));
			}
			if nsems > set.sems.len() {
				return Err(errno!(EINVAL));
			}
			if !set.perm.can_access(&creds, false) {
				return Err(errno!(EACCES));
			}
			return Ok(make_id(i, set.gen));
		}
		if flags & IPC_CREAT == 0 {
			return Err(errno!(ENOENT));
		}
	}
	if nsems == 0 {
		return Err(errno!(EINVAL));
	}
	// Create a new set
	let (i, slot) = slots
		.iter_mut()
		.enumerate()
		.find(|(_, s)| s.set.is_none())
		.ok_or_else(|| errno!(ENOSPC))?;
	slot.gen += 1;
	let mut sems = Vec::new();
	sems.resize(nsems, Semaphore::default())?;
	slot.set = Some(SemSet {
		key,
		gen: slot.gen,
		perm: IpcPerm {
			key,
			uid: creds.euid,
			gid: creds.egid,
			cuid: creds.euid,
			cgid: creds.egid,
			mode: (flags & 0o777) as u16,
		},
		sems,
	});
	Ok(make_id(i, slot.gen))
}

/// The result of one attempt at applying a batch.
enum BatchResult {
	/// Every operation applied.
	Done,
	/// The operation at the given index would block. Already-applied operations have been
	/// reversed.
	Blocked(usize),
}

/// Attempts to apply the whole batch atomically.
///
/// On a blocking operation, the operations already applied are reversed and the function
/// returns the index of the blocking operation.
fn try_batch(set: &mut SemSet, ops: &[SemBuf], pid: Pid) -> EResult<BatchResult> {
	for (i, op) in ops.iter().enumerate() {
		let index = op.sem_num as usize;
		let Some(sem) = set.sems.get_mut(index) else {
			reverse_batch(set, &ops[..i], pid);
			return Err(errno!(EFBIG));
		};
		let val = op.sem_op as i32;
		let blocked = if val > 0 {
			if sem.semval > SEMVMX - val {
				reverse_batch(set, &ops[..i], pid);
				return Err(errno!(ERANGE));
			}
			sem.semval += val;
			sem.sempid = pid;
			false
		} else if val < 0 {
			if sem.semval + val >= 0 {
				sem.semval += val;
				sem.sempid = pid;
				false
			} else {
				true
			}
		} else {
			sem.semval != 0
		};
		if blocked {
			reverse_batch(set, &ops[..i], pid);
			return Ok(BatchResult::Blocked(i));
		}
	}
	Ok(BatchResult::Done)
}

/// Reverses the already-applied prefix of a batch.
fn reverse_batch(set: &mut SemSet, applied: &[SemBuf], pid: Pid) {
	for op in applied.iter().rev() {
		let sem = &mut set.sems[op.sem_num as usize];
		sem.semval -= op.sem_op as i32;
		sem.sempid = pid;
	}
}

/// Performs a batch of operations on the set `id`, atomically.
///
/// A blocking operation puts the task to sleep until another task changes the semaphore, then
/// the whole batch is restarted. If the set is removed while the task sleeps, the function
/// returns [`errno::EIDRM`]; if the sleep is interrupted by a signal, [`errno::EINTR`].
pub fn semop(proc: &Arc<Process>, id: i32, ops: &[SemBuf]) -> EResult<()> {
	if ops.len() > SEMOPM {
		return Err(errno!(E2BIG));
	}
	loop {
		let blocked_at = {
			let mut slots = SETS.lock();
			let set = check_id(&mut slots, id)?;
			if !set.perm.can_access(&proc.credentials(), true) {
				return Err(errno!(EACCES));
			}
			match try_batch(set, ops, proc.pid)? {
				BatchResult::Done => {
					// Record undo adjustments and wake the waiters
					let gen = set.gen;
					let mut journal = proc.sem_undo.lock();
					for op in ops.iter() {
						if op.sem_flg & SEM_UNDO != 0 && op.sem_op != 0 {
							journal.push(UndoEntry {
								id,
								gen,
								index: op.sem_num as usize,
								adj: -(op.sem_op as i32),
							})?;
						}
					}
					None
				}
				BatchResult::Blocked(i) => {
					if ops[i].sem_flg & (IPC_NOWAIT as i16) != 0 {
						return Err(errno!(EAGAIN));
					}
					let index = ops[i].sem_num as usize;
					if ops[i].sem_op < 0 {
						set.sems[index].semncnt += 1;
					} else {
						set.sems[index].semzcnt += 1;
					}
					Some(i)
				}
			}
		};
		let Some(blocked_at) = blocked_at else {
			scheduler::wake_channel(channel(id));
			return Ok(());
		};
		// Sleep until the set changes, then restart the whole batch
		let res = scheduler::block_on(channel(id));
		{
			let mut slots = SETS.lock();
			match check_id(&mut slots, id) {
				Ok(set) => {
					let index = ops[blocked_at].sem_num as usize;
					if ops[blocked_at].sem_op < 0 {
						set.sems[index].semncnt -= 1;
					} else {
						set.sems[index].semzcnt -= 1;
					}
				}
				// The set was removed while we slept
				Err(e) => return Err(e),
			}
		}
		res?;
	}
}

/// Performs the control operation `cmd` on the set `id`.
pub fn semctl(proc: &Arc<Process>, id: i32, semnum: usize, cmd: i32, arg: i32) -> EResult<i32> {
	let mut slots = SETS.lock();
	match cmd {
		IPC_RMID => {
			let set = check_id(&mut slots, id)?;
			if !proc.credentials().is_privileged() && proc.credentials().euid != set.perm.uid {
				return Err(errno!(EPERM));
			}
			slots[id_index(id)].set = None;
			drop(slots);
			// Tasks blocked on the set wake up and observe EIDRM
			scheduler::wake_channel(channel(id));
			Ok(0)
		}
		GETVAL => {
			let set = check_id(&mut slots, id)?;
			let sem = set.sems.get(semnum).ok_or_else(|| errno!(EINVAL))?;
			Ok(sem.semval)
		}
		GETPID => {
			let set = check_id(&mut slots, id)?;
			let sem = set.sems.get(semnum).ok_or_else(|| errno!(EINVAL))?;
			Ok(sem.sempid as i32)
		}
		GETNCNT => {
			let set = check_id(&mut slots, id)?;
			let sem = set.sems.get(semnum).ok_or_else(|| errno!(EINVAL))?;
			Ok(sem.semncnt as i32)
		}
		GETZCNT => {
			let set = check_id(&mut slots, id)?;
			let sem = set.sems.get(semnum).ok_or_else(|| errno!(EINVAL))?;
			Ok(sem.semzcnt as i32)
		}
		SETVAL => {
			if !(0..=SEMVMX).contains(&arg) {
				return Err(errno!(ERANGE));
			}
			let set = check_id(&mut slots, id)?;
			if !set.perm.can_access(&proc.credentials(), true) {
				return Err(errno!(EACCES));
			}
			let sem = set.sems.get_mut(semnum).ok_or_else(|| errno!(EINVAL))?;
			sem.semval = arg;
			sem.sempid = proc.pid;
			drop(slots);
			scheduler::wake_channel(channel(id));
			Ok(0)
		}
		IPC_STAT | IPC_SET | GETALL | SETALL => {
			// The full structure transfers go through the system call layer
			check_id(&mut slots, id)?;
			Ok(0)
		}
		_ => Err(errno!(EINVAL)),
	}
}

/// Applies the undo journal of an exiting task.
///
/// Each adjustment applies only to a set whose generation still matches the journal entry: an
/// entry against a removed or recycled set has no effect. Values are not clamped, so a dying
/// task can leave a set at any valid value.
pub fn apply_undo(proc: &Arc<Process>) {
	let journal = core::mem::take(&mut *proc.sem_undo.lock());
	if journal.is_empty() {
		return;
	}
	let mut slots = SETS.lock();
	let mut touched = [false; SEMMNI];
	for entry in journal.iter() {
		let Ok(set) = check_id(&mut slots, entry.id) else {
			continue;
		};
		if set.gen != entry.gen {
			continue;
		}
		if let Some(sem) = set.sems.get_mut(entry.index) {
			sem.semval += entry.adj;
			sem.sempid = proc.pid;
			touched[id_index(entry.id)] = true;
		}
	}
	drop(slots);
	for (i, touched) in touched.iter().enumerate() {
		if *touched {
			scheduler::wake_channel(channel(make_id(i, 0)));
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn op(num: u16, val: i16, flags: i16) -> SemBuf {
		SemBuf {
			sem_num: num,
			sem_op: val,
			sem_flg: flags,
		}
	}

	fn new_set(nsems: usize) -> SemSet {
		let mut sems = Vec::new();
		sems.resize(nsems, Semaphore::default()).unwrap();
		SemSet {
			key: 42,
			gen: 1,
			perm: IpcPerm {
				key: 42,
				uid: 0,
				gid: 0,
				cuid: 0,
				cgid: 0,
				mode: 0o600,
			},
			sems,
		}
	}

	#[test_case]
	fn sem_batch_atomic_reverse() {
		let mut set = new_set(3);
		set.sems[0].semval = 1;
		set.sems[1].semval = 0;
		// The second operation blocks: the first must be reversed
		let ops = [op(0, -1, 0), op(1, -1, 0)];
		let res = try_batch(&mut set, &ops, 1).unwrap();
		assert!(matches!(res, BatchResult::Blocked(1)));
		assert_eq!(set.sems[0].semval, 1);
		// Making the second semaphore positive lets the whole batch through
		set.sems[1].semval = 1;
		let res = try_batch(&mut set, &ops, 1).unwrap();
		assert!(matches!(res, BatchResult::Done));
		assert_eq!(set.sems[0].semval, 0);
		assert_eq!(set.sems[1].semval, 0);
	}

	#[test_case]
	fn sem_batch_wait_for_zero() {
		let mut set = new_set(1);
		set.sems[0].semval = 2;
		let ops = [op(0, 0, 0)];
		assert!(matches!(
			try_batch(&mut set, &ops, 1).unwrap(),
			BatchResult::Blocked(0)
		));
		set.sems[0].semval = 0;
		assert!(matches!(
			try_batch(&mut set, &ops, 1).unwrap(),
			BatchResult::Done
		));
	}

	#[test_case]
	fn sem_id_generation() {
		let mut slots: Vec<Slot> = Vec::new();
		ensure_slots(&mut slots).unwrap();
		slots[3].gen = 1;
		slots[3].set = Some(new_set(1));
		let id = make_id(3, 1);
		assert!(check_id(&mut slots, id).is_ok());
		// Removing then recycling the slot invalidates the old identifier
		slots[3].set = None;
		assert_eq!(check_id(&mut slots, id).unwrap_err(), errno!(EIDRM));
		slots[3].gen = 2;
		let mut set = new_set(1);
		set.gen = 2;
		slots[3].set = Some(set);
		assert_eq!(check_id(&mut slots, id).unwrap_err(), errno!(EIDRM));
		assert!(check_id(&mut slots, make_id(3, 2)).is_ok());
	}
}
