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

//! The `execve` system call replaces the current program with a new one.

use crate::{
	file::vfs,
	memory::user::{UserPtr, UserString},
	process::{exec, scheduler, Process},
};
use utils::{
	collections::{path::Path, string::String, vec::Vec},
	errno,
	errno::EResult,
	limits::PAGE_SIZE,
	TryClone,
};

/// The maximum number of interpreter indirections.
const INTERP_MAX: usize = 4;

/// Copies a NUL-terminated array of NUL-terminated strings from userspace.
fn copy_string_array(array: usize) -> EResult<Vec<String>> {
	let mut strings = Vec::new();
	let mut i = 0;
	loop {
		let ptr = UserPtr::<u64>::from_user(array + i * 8);
		let Some(str_ptr) = ptr.copy_from_user()? else {
			break;
		};
		if str_ptr == 0 {
			break;
		}
		let s = UserString::from_user(str_ptr as usize);
		strings.push(s.copy_from_user()?)?;
		i += 1;
	}
	Ok(strings)
}

/// Parses a shebang line, returning the interpreter path and its optional single argument.
fn parse_shebang(line: &[u8]) -> Option<(&[u8], Option<&[u8]>)> {
	let line = line.strip_prefix(b"#!")?;
	let end = line.iter().position(|b| *b == b'\n')?;
	let line = &line[..end];
	let mut words = line
		.split(|b| *b == b' ' || *b == b'\t')
		.filter(|w| !w.is_empty());
	let interp = words.next()?;
	// A single optional argument, per tradition
	let arg = words.next();
	Some((interp, arg))
}

/// Executes the program at `pathname` with the given arguments and environment.
pub fn execve(pathname: UserString, argv: usize, envp: usize) -> EResult<usize> {
	let proc = Process::current();
	let mut path_buf = pathname.copy_from_user()?;
	let mut argv = copy_string_array(argv)?;
	let envp = copy_string_array(envp)?;
	// Follow shebang indirections
	let mut node = vfs::node_from_path(Path::new(&*path_buf)?)?;
	for _ in 0..INTERP_MAX {
		let mut first = [0u8; PAGE_SIZE];
		node.read_page_raw(0, &mut first)?;
		let Some((interp, arg)) = parse_shebang(&first) else {
			break;
		};
		// Rebuild the argument list: interpreter, optional argument, script path, then the
		// original arguments past argv[0]
		let mut new_argv = Vec::new();
		new_argv.push(String::try_from(interp)?)?;
		if let Some(arg) = arg {
			new_argv.push(String::try_from(arg)?)?;
		}
		new_argv.push(String::try_from(&*path_buf)?)?;
		for old in argv.iter().skip(1) {
			new_argv.push(old.try_clone()?)?;
		}
		argv = new_argv;
		path_buf = String::try_from(interp)?;
		node = vfs::node_from_path(Path::new(interp)?)?;
	}
	let image = exec::build_image(&proc, node, argv, envp)?;
	exec::exec(&proc, image)?;
	// Resume in the new program
	scheduler::enter_user(&proc)
}
