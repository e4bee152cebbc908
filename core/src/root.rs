use std::{fmt, path::Path};

use fsn_fs_watcher::{unflatten, WatchId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
	/// Native watch is live and owned by this root
	Active(WatchId),
	/// Path is gone or inaccessible, the recovery poller checks it from time to time
	Missing,
}

/// One requested root, with its watch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
	/// As requested by the host, flatten marker included
	pub path: String,
	pub state: RootState,
}

impl WatchRoot {
	pub fn active(path: impl Into<String>, id: WatchId) -> Self {
		Self {
			path: path.into(),
			state: RootState::Active(id),
		}
	}

	pub fn missing(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			state: RootState::Missing,
		}
	}

	/// Filesystem path without the flatten marker
	pub fn unflattened(&self) -> &Path {
		Path::new(unflatten(&self.path).0)
	}

	pub fn is_flat(&self) -> bool {
		unflatten(&self.path).1
	}

	pub fn watch_id(&self) -> Option<WatchId> {
		match self.state {
			RootState::Active(id) => Some(id),
			RootState::Missing => None,
		}
	}

	pub fn is_missing(&self) -> bool {
		self.state == RootState::Missing
	}

	/// Hand back the native watch, leaving the root missing.
	pub fn take_watch(&mut self) -> Option<WatchId> {
		let id = self.watch_id();
		self.state = RootState::Missing;
		id
	}
}

impl fmt::Display for WatchRoot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unflattened() {
		let root = WatchRoot::missing("|/home/user/project");
		assert_eq!(root.unflattened(), Path::new("/home/user/project"));
		assert!(root.is_flat());
		assert!(!WatchRoot::missing("/home").is_flat());
	}

	#[test]
	fn test_take_watch_only_once() {
		let mut root = WatchRoot::active("/home", WatchId::new(7));
		assert_eq!(root.take_watch(), Some(WatchId::new(7)));
		assert!(root.is_missing());
		assert_eq!(root.take_watch(), None);
	}
}
