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

//! The `ioctl` system call performs a device-specific control operation.

use crate::{
	device,
	device::storage::loopback,
	memory::user::UserPtr,
	process::Process,
};
use utils::{errno, errno::EResult};

/// Performs the control operation `cmd` on the device open at the descriptor `fd`.
///
/// Loopback commands taking a userspace structure or a file descriptor are decoded here; the
/// rest is forwarded to the device driver.
pub fn ioctl(fd: u32, cmd: u32, arg: usize) -> EResult<usize> {
	let proc = Process::current();
	let fds = proc.fd_table().ok_or_else(|| errno!(EBADF))?;
	let node = fds.lock().get(fd)?.file.node.clone();
	let dev = node.dev_id.ok_or_else(|| errno!(ENOTTY))?;
	match cmd {
		loopback::LOOP_SET_FD | loopback::LOOP_CHANGE_FD => {
			// The argument is the descriptor of the backing file
			let backing = fds.lock().get(arg as u32)?.file.node.clone();
			if cmd == loopback::LOOP_SET_FD {
				loopback::set_fd(dev.minor, backing)?;
			} else {
				loopback::change_fd(dev.minor, backing)?;
			}
			Ok(0)
		}
		loopback::LOOP_CONFIGURE => {
			let config = UserPtr::<loopback::LoopConfig>::from_user(arg)
				.copy_from_user()?
				.ok_or_else(|| errno!(EFAULT))?;
			let backing = fds.lock().get(config.fd)?.file.node.clone();
			loopback::configure(dev.minor, backing, &config)?;
			Ok(0)
		}
		loopback::LOOP_SET_STATUS | loopback::LOOP_SET_STATUS64 => {
			let info = UserPtr::<loopback::LoopInfo64>::from_user(arg)
				.copy_from_user()?
				.ok_or_else(|| errno!(EFAULT))?;
			loopback::set_status(dev.minor, &info)?;
			Ok(0)
		}
		loopback::LOOP_GET_STATUS | loopback::LOOP_GET_STATUS64 => {
			let info = loopback::get_status(dev.minor)?;
			UserPtr::<loopback::LoopInfo64>::from_user(arg).copy_to_user(&info)?;
			Ok(0)
		}
		_ => {
			let ops = device::get(dev.major).ok_or_else(|| errno!(ENODEV))?;
			ops.ioctl(dev.minor, cmd, arg)
		}
	}
}
