//! Linux inotify engine
//!
//! inotify watches a single directory per descriptor, so a recursive root is a tree of
//! descriptors. The kernel hands back the same descriptor when two roots cover the same
//! directory, hence every node is reference counted and only leaves the kernel with its last owner.

use crate::{
	error::{EngineError, WatchError},
	event::{EventMask, RawEvent},
	is_parent_path, unflatten, WatchEngine, WatchId,
};

use std::{
	collections::HashMap,
	ffi::OsString,
	fs, io,
	path::{Path, PathBuf},
};

use inotify::{EventMask as InotifyMask, Inotify, WatchDescriptor, WatchMask};
use tracing::{debug, error, trace, warn};

/// Room for a few hundred events with long names per read
const EVENT_BUFFER_SIZE: usize = 64 * 1024;

fn watch_mask() -> WatchMask {
	WatchMask::CREATE
		| WatchMask::MODIFY
		| WatchMask::ATTRIB
		| WatchMask::DELETE
		| WatchMask::DELETE_SELF
		| WatchMask::MOVE_SELF
		| WatchMask::MOVED_FROM
		| WatchMask::MOVED_TO
		| WatchMask::DONT_FOLLOW
		| WatchMask::ONLYDIR
}

#[derive(Debug)]
struct WatchNode {
	path: PathBuf,
	parent: Option<WatchDescriptor>,
	kids: Vec<WatchDescriptor>,
	/// Number of roots covering this directory
	refs: usize,
	/// Directories created below this one get watched too
	recursive: bool,
}

#[derive(Debug)]
struct RootWatch {
	/// `None` once the kernel dropped the root's descriptor
	wd: Option<WatchDescriptor>,
}

/// inotify backed engine
pub struct InotifyEngine {
	inotify: Inotify,
	nodes: HashMap<WatchDescriptor, WatchNode>,
	roots: HashMap<WatchId, RootWatch>,
	next_id: u64,
	buffer: Vec<u8>,
}

impl std::fmt::Debug for InotifyEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InotifyEngine")
			.field("nodes", &self.nodes.len())
			.field("roots", &self.roots.len())
			.finish()
	}
}

impl InotifyEngine {
	/// Create a new inotify instance
	pub fn new() -> Result<Self, EngineError> {
		let inotify = Inotify::init().map_err(|e| {
			if e.raw_os_error() == Some(libc::EMFILE) {
				EngineError::InstanceLimit
			} else {
				EngineError::Init(e)
			}
		})?;

		Ok(Self {
			inotify,
			nodes: HashMap::new(),
			roots: HashMap::new(),
			next_id: 0,
			buffer: vec![0; EVENT_BUFFER_SIZE],
		})
	}

	/// Number of directories currently holding a kernel watch
	pub fn watched_directories(&self) -> usize {
		self.nodes.len()
	}

	fn add_watch(
		&mut self,
		path: &Path,
		parent: Option<&WatchDescriptor>,
		recursive: bool,
		refs: usize,
	) -> Result<WatchDescriptor, WatchError> {
		let wd = match self.inotify.watches().add(path, watch_mask()) {
			Ok(wd) => wd,
			Err(e) => {
				return Err(match e.raw_os_error() {
					Some(libc::EACCES | libc::ENOENT | libc::ENOTDIR) => {
						WatchError::Ignored(path.to_path_buf())
					}
					Some(libc::ENOSPC) => {
						warn!(path = %path.display(), "inotify watch limit reached;");
						WatchError::LimitReached(path.to_path_buf())
					}
					_ => {
						error!(path = %path.display(), ?e, "inotify_add_watch failed;");
						WatchError::Abort(format!("inotify_add_watch({}): {e}", path.display()))
					}
				});
			}
		};

		if let Some(node) = self.nodes.get_mut(&wd) {
			if node.path != path {
				// bind mounts and hard-linked directories share an inode with another watched path
				debug!(
					path = %path.display(),
					existing = %node.path.display(),
					"Directory already watched under another path;"
				);
				return Err(WatchError::Ignored(path.to_path_buf()));
			}

			node.refs += refs;
			node.recursive |= recursive;

			// a root watched on its own earlier, now reached from a root above it
			let adopted = node.parent.is_none() && parent.is_some();
			if adopted {
				node.parent = parent.cloned();
				if let Some(parent_node) = parent.and_then(|parent| self.nodes.get_mut(parent)) {
					parent_node.kids.push(wd.clone());
				}
			}

			return Ok(wd);
		}

		trace!(path = %path.display(), "Watching directory");

		if let Some(parent_node) = parent.and_then(|parent| self.nodes.get_mut(parent)) {
			parent_node.kids.push(wd.clone());
		}

		self.nodes.insert(
			wd.clone(),
			WatchNode {
				path: path.to_path_buf(),
				parent: parent.cloned(),
				kids: Vec::new(),
				refs,
				recursive,
			},
		);

		Ok(wd)
	}

	fn walk_tree(
		&mut self,
		path: &Path,
		parent: Option<&WatchDescriptor>,
		recursive: bool,
		exclusions: &[PathBuf],
		refs: usize,
		touched: &mut Vec<WatchDescriptor>,
	) -> Result<WatchDescriptor, WatchError> {
		if exclusions
			.iter()
			.any(|excluded| is_parent_path(excluded, path))
		{
			trace!(path = %path.display(), "Skipping excluded directory");
			return Err(WatchError::Ignored(path.to_path_buf()));
		}

		let entries = if recursive {
			match fs::read_dir(path) {
				Ok(entries) => Some(entries),
				Err(e)
					if matches!(
						e.raw_os_error(),
						Some(libc::EACCES | libc::ENOENT | libc::ENOTDIR)
					) =>
				{
					return Err(WatchError::Ignored(path.to_path_buf()));
				}
				Err(e) => {
					warn!(path = %path.display(), ?e, "Unable to read directory;");
					return Err(WatchError::Failed {
						path: path.to_path_buf(),
						source: e,
					});
				}
			}
		} else {
			None
		};

		let wd = self.add_watch(path, parent, recursive, refs)?;
		touched.push(wd.clone());

		for entry in entries.into_iter().flatten() {
			let Ok(entry) = entry else {
				continue;
			};

			// symlinks are not followed
			if !entry.file_type().is_ok_and(|file_type| file_type.is_dir()) {
				continue;
			}

			match self.walk_tree(&entry.path(), Some(&wd), true, exclusions, refs, touched) {
				Ok(_) | Err(WatchError::Ignored(_) | WatchError::Missing(_)) => {}
				Err(e) => return Err(e),
			}
		}

		Ok(wd)
	}

	/// Drop `count` references from the subtree at `wd`, removing kernel watches that reach zero.
	///
	/// Returns the nodes that were removed.
	fn release(&mut self, wd: &WatchDescriptor, count: usize) -> Vec<(WatchDescriptor, PathBuf)> {
		let mut removed = Vec::new();

		let Some(node) = self.nodes.get_mut(wd) else {
			return removed;
		};

		node.refs = node.refs.saturating_sub(count);
		let dead = node.refs == 0;
		let kids = node.kids.clone();

		for kid in &kids {
			removed.extend(self.release(kid, count));
		}

		if dead {
			if let Some(path) = self.detach(wd) {
				if let Err(e) = self.inotify.watches().remove(wd.clone()) {
					// already gone when the directory itself was deleted
					trace!(path = %path.display(), ?e, "inotify_rm_watch failed;");
				}
				removed.push((wd.clone(), path));
			}
		}

		removed
	}

	/// Give back the references a failed walk took on each of `touched`, deepest first.
	fn roll_back(&mut self, touched: &[WatchDescriptor], refs: usize) {
		for wd in touched.iter().rev() {
			let Some(node) = self.nodes.get_mut(wd) else {
				continue;
			};

			node.refs = node.refs.saturating_sub(refs);
			if node.refs > 0 {
				continue;
			}

			if let Some(path) = self.detach(wd) {
				trace!(path = %path.display(), "Dropping partially built watch");
				if let Err(e) = self.inotify.watches().remove(wd.clone()) {
					trace!(path = %path.display(), ?e, "inotify_rm_watch failed;");
				}
			}
		}
	}

	/// Remove the node from the tree bookkeeping without touching the kernel.
	fn detach(&mut self, wd: &WatchDescriptor) -> Option<PathBuf> {
		let node = self.nodes.remove(wd)?;

		if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
			parent.kids.retain(|kid| kid != wd);
		}

		for kid in &node.kids {
			if let Some(kid_node) = self.nodes.get_mut(kid) {
				kid_node.parent = None;
			}
		}

		for root in self.roots.values_mut() {
			if root.wd.as_ref() == Some(wd) {
				root.wd = None;
			}
		}

		Some(node.path)
	}

	fn root_wds(&self) -> impl Iterator<Item = &WatchDescriptor> {
		self.roots.values().filter_map(|root| root.wd.as_ref())
	}

	fn process_event(
		&mut self,
		wd: WatchDescriptor,
		mask: InotifyMask,
		name: Option<OsString>,
		events: &mut Vec<RawEvent>,
	) -> Result<(), EngineError> {
		if mask.contains(InotifyMask::Q_OVERFLOW) {
			warn!("inotify event queue overflow;");
			events.push(RawEvent::overflow());
			return Ok(());
		}

		if mask.contains(InotifyMask::IGNORED) {
			self.detach(&wd);
			return Ok(());
		}

		let Some(node) = self.nodes.get(&wd) else {
			return Ok(());
		};

		let path = match name {
			Some(name) => node.path.join(name),
			None => node.path.clone(),
		};
		let (recursive, refs) = (node.recursive, node.refs);
		let is_dir = mask.contains(InotifyMask::ISDIR);

		if is_dir && recursive && mask.intersects(InotifyMask::CREATE | InotifyMask::MOVED_TO) {
			match self.walk_tree(&path, Some(&wd), true, &[], refs, &mut Vec::new()) {
				Ok(_) | Err(WatchError::Ignored(_) | WatchError::Missing(_)) => {}
				Err(WatchError::Abort(reason)) => return Err(EngineError::Abort(reason)),
				Err(e) => warn!(?e, "Unable to watch new directory;"),
			}
		}

		if is_dir && mask.contains(InotifyMask::MOVED_FROM) {
			// the directory still exists elsewhere, its descriptors would keep reporting stale paths
			let moved = self.nodes.get(&wd).and_then(|node| {
				node.kids
					.iter()
					.find(|kid| self.nodes.get(*kid).is_some_and(|kid| kid.path == path))
					.cloned()
			});

			if let Some(moved) = moved {
				let root_wds = self.root_wds().cloned().collect::<Vec<_>>();
				for (removed_wd, removed_path) in self.release(&moved, usize::MAX) {
					if root_wds.contains(&removed_wd) {
						events.push(RawEvent::new(removed_path, EventMask::MOVE_SELF));
					}
				}
			}
		}

		events.push(RawEvent::new(
			path,
			EventMask::from_bits_truncate(mask.bits()),
		));

		Ok(())
	}
}

impl WatchEngine for InotifyEngine {
	fn watch(&mut self, root: &str, exclusions: &[PathBuf]) -> Result<WatchId, WatchError> {
		let (path, flat) = unflatten(root);
		let path = Path::new(path);

		match fs::metadata(path) {
			Ok(metadata) if metadata.is_dir() => {}
			Ok(_) => return Err(WatchError::Ignored(path.to_path_buf())),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				return Err(WatchError::Missing(path.to_path_buf()));
			}
			Err(e)
				if matches!(
					e.raw_os_error(),
					Some(libc::EACCES | libc::ELOOP | libc::ENOTDIR)
				) =>
			{
				return Err(WatchError::Ignored(path.to_path_buf()));
			}
			Err(e) => {
				error!(path = %path.display(), ?e, "Unable to stat watch root;");
				return Err(WatchError::Failed {
					path: path.to_path_buf(),
					source: e,
				});
			}
		}

		let mut touched = Vec::new();
		let wd = match self.walk_tree(path, None, !flat, exclusions, 1, &mut touched) {
			Ok(wd) => wd,
			Err(e) => {
				self.roll_back(&touched, 1);
				debug!(root, ?e, directories = self.nodes.len(), "Root watch abandoned");
				return Err(e);
			}
		};

		let id = WatchId::new(self.next_id);
		self.next_id += 1;
		self.roots.insert(id, RootWatch { wd: Some(wd) });

		debug!(%id, root, directories = self.nodes.len(), "Root watched");

		Ok(id)
	}

	fn unwatch(&mut self, id: WatchId) {
		match self.roots.remove(&id) {
			Some(RootWatch { wd: Some(wd) }) => {
				self.release(&wd, 1);
			}
			Some(RootWatch { wd: None }) => trace!(%id, "Root descriptor already dropped by the kernel"),
			None => trace!(%id, "Tried to unwatch an unknown root"),
		}
	}

	fn drain(&mut self) -> Result<Vec<RawEvent>, EngineError> {
		let mut events = Vec::new();

		loop {
			let batch = match self.inotify.read_events(&mut self.buffer) {
				Ok(batch) => batch
					.map(|event| (event.wd, event.mask, event.name.map(ToOwned::to_owned)))
					.collect::<Vec<_>>(),
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(EngineError::Read(e)),
			};

			if batch.is_empty() {
				break;
			}

			for (wd, mask, name) in batch {
				self.process_event(wd, mask, name, &mut events)?;
			}
		}

		Ok(events)
	}
}
