//!
//! # fsnotifier native watch engines
//!
//! Turns a root directory into native watches and reports raw change events for it.
//! Every backend implements [`WatchEngine`]:
//! - Linux uses inotify directly, one kernel watch per directory, so nested sub-paths can be left out;
//! - every other target goes through `notify`'s recommended watcher.
//!
//! Engines never block: events queue up inside the engine until [`WatchEngine::drain`] is called
//! from the owner's loop.

#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation
)]

use std::path::{Path, PathBuf};

mod error;
mod event;
pub mod platform;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{EngineError, WatchError};
pub use event::{EventMask, RawEvent};
pub use platform::{GenericEngine, NativeEngine};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use platform::InotifyEngine;

/// Marker prefixed to a root that should be watched without descending into sub-directories.
pub const FLATTEN_MARKER: char = '|';

/// Opaque handle for a watched root, issued by the engine that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
	pub fn new(raw: u64) -> Self {
		Self(raw)
	}
}

impl std::fmt::Display for WatchId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A native notification engine.
///
/// Mirrors the kernel contract: each successful [`watch`](Self::watch) owns native resources until
/// the matching [`unwatch`](Self::unwatch). Callers must release every id exactly once.
pub trait WatchEngine {
	/// Watch `root` recursively, leaving out every directory listed in `exclusions`.
	///
	/// `root` may carry the [`FLATTEN_MARKER`], in which case only the directory itself is watched.
	fn watch(&mut self, root: &str, exclusions: &[PathBuf]) -> Result<WatchId, WatchError>;

	/// Release every native watch owned by `id`.
	fn unwatch(&mut self, id: WatchId);

	/// Collect every event queued since the last call, without blocking.
	fn drain(&mut self) -> Result<Vec<RawEvent>, EngineError>;
}

impl<E: WatchEngine + ?Sized> WatchEngine for Box<E> {
	fn watch(&mut self, root: &str, exclusions: &[PathBuf]) -> Result<WatchId, WatchError> {
		(**self).watch(root, exclusions)
	}

	fn unwatch(&mut self, id: WatchId) {
		(**self).unwatch(id)
	}

	fn drain(&mut self) -> Result<Vec<RawEvent>, EngineError> {
		(**self).drain()
	}
}

/// Split a requested root into its filesystem path and whether it is flattened.
pub fn unflatten(root: &str) -> (&str, bool) {
	match root.strip_prefix(FLATTEN_MARKER) {
		Some(path) => (path, true),
		None => (root, false),
	}
}

/// `child` equals `parent`, or starts with `parent` followed by a path separator.
///
/// Compared byte-wise on the raw paths, so `/mnt/data` is not a parent of `/mnt/database`.
pub fn is_parent_path(parent: impl AsRef<Path>, child: impl AsRef<Path>) -> bool {
	let parent = parent.as_ref().as_os_str().as_encoded_bytes();
	let child = child.as_ref().as_os_str().as_encoded_bytes();

	child.starts_with(parent)
		&& (child.len() == parent.len() || child[parent.len()] == std::path::MAIN_SEPARATOR as u8)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unflatten() {
		assert_eq!(unflatten("|/home/user/project"), ("/home/user/project", true));
		assert_eq!(unflatten("/home/user/project"), ("/home/user/project", false));
		assert_eq!(unflatten("|"), ("", true));
	}

	#[test]
	fn test_is_parent_path() {
		assert!(is_parent_path("/mnt", "/mnt/data"));
		assert!(is_parent_path("/mnt/data", "/mnt/data"));
		// the separator must follow the parent, which a bare `/` never satisfies
		assert!(!is_parent_path("/", "/anything"));
		assert!(is_parent_path("/", "/"));
		assert!(!is_parent_path("/mnt/data", "/mnt/database"));
		assert!(!is_parent_path("/mnt/data", "/mnt"));
	}
}
