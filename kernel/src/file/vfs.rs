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

//! The Virtual FileSystem: pathname resolution over the node layer.
//!
//! Resolved nodes are pinned by their reference count until released. A small dentry cache
//! remembers directory lookups; it is invalidated per-device on unmount to break the reference
//! cycles that would otherwise keep nodes alive.

use crate::{
	device::DeviceID,
	file::{mountpoint, Mode, Node, S_IFDIR},
	sync::mutex::Mutex,
};
use utils::{
	collections::{path::Path, string::String, vec::Vec},
	errno,
	errno::EResult,
	ptr::arc::Arc,
};

/// A cached directory lookup.
#[derive(Debug)]
struct Dentry {
	/// The identity of the parent directory.
	parent_dev: DeviceID,
	parent_inode: u64,
	/// The name of the entry.
	name: String,
	/// The resolved node.
	node: Arc<Node>,
}

/// The dentry cache.
static DENTRIES: Mutex<Vec<Dentry>> = Mutex::new(Vec::new());

/// Looks up `name` in the directory `dir`, going through the dentry cache.
fn lookup_cached(dir: &Arc<Node>, name: &[u8]) -> EResult<Option<Arc<Node>>> {
	{
		let dentries = DENTRIES.lock();
		let hit = dentries.iter().find(|d| {
			d.parent_dev == dir.dev && d.parent_inode == dir.inode && d.name == *name
		});
		if let Some(d) = hit {
			return Ok(Some(d.node.clone()));
		}
	}
	let Some(node) = dir.ops.lookup(dir, name)? else {
		return Ok(None);
	};
	let mut dentries = DENTRIES.lock();
	let _ = dentries.push(Dentry {
		parent_dev: dir.dev,
		parent_inode: dir.inode,
		name: String::try_from(name)?,
		node: node.clone(),
	});
	Ok(Some(node))
}

/// If `node` is a mount point, returns the root of the mounted filesystem. Otherwise, returns
/// `node` itself.
fn cross_mount(node: Arc<Node>) -> Arc<Node> {
	match node.mounted_root() {
		Some(root) => root,
		None => node,
	}
}

/// Resolves the given absolute path to a node.
///
/// The returned node is pinned until dropped.
pub fn node_from_path(path: &Path) -> EResult<Arc<Node>> {
	if !path.is_absolute() {
		return Err(errno!(EINVAL));
	}
	let mut node = cross_mount(mountpoint::root_node()?);
	for comp in path.components() {
		if comp == b"." {
			continue;
		}
		if node.file_type() != S_IFDIR {
			return Err(errno!(ENOTDIR));
		}
		let next = lookup_cached(&node, comp)?.ok_or_else(|| errno!(ENOENT))?;
		node = cross_mount(next);
	}
	Ok(node)
}

/// Resolves the parent directory of the given absolute path, returning it along with the name
/// of the last component.
pub fn parent_from_path(path: &Path) -> EResult<(Arc<Node>, &[u8])> {
	let name = path.file_name().ok_or_else(|| errno!(EINVAL))?;
	let mut node = cross_mount(mountpoint::root_node()?);
	let mut components = path.components().peekable();
	while let Some(comp) = components.next() {
		if components.peek().is_none() {
			break;
		}
		if node.file_type() != S_IFDIR {
			return Err(errno!(ENOTDIR));
		}
		let next = lookup_cached(&node, comp)?.ok_or_else(|| errno!(ENOENT))?;
		node = cross_mount(next);
	}
	Ok((node, name))
}

/// Creates a file at the given absolute path with the given mode.
pub fn create_from_path(path: &Path, mode: Mode) -> EResult<Arc<Node>> {
	let (parent, name) = parent_from_path(path)?;
	parent.ops.create(&parent, name, mode)
}

/// Drops every cached dentry whose node or parent belongs to the device `dev`.
///
/// This breaks the reference cycles that would otherwise block the unmount of the device.
pub fn invalidate_dev_dentries(dev: DeviceID) {
	let mut dentries = DENTRIES.lock();
	dentries.retain(|d| d.node.dev != dev && d.parent_dev != dev);
}
