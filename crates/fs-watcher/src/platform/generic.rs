//! Portable engine on top of `notify`'s recommended watcher
//!
//! The backend owns the traversal, so exclusions are applied as a path filter on delivered
//! events rather than by leaving directories unwatched.

use crate::{
	error::{EngineError, WatchError},
	event::{EventMask, RawEvent},
	is_parent_path, unflatten, WatchEngine, WatchId,
};

use std::{
	collections::HashMap,
	fs, io,
	path::{Path, PathBuf},
};

use async_channel as chan;
use notify::{
	event::{ModifyKind, RenameMode},
	Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{debug, error, trace, warn};

#[derive(Debug)]
struct GenericRoot {
	path: PathBuf,
	exclusions: Vec<PathBuf>,
}

/// `notify` backed engine
pub struct GenericEngine {
	watcher: RecommendedWatcher,
	events_rx: chan::Receiver<notify::Result<Event>>,
	roots: HashMap<WatchId, GenericRoot>,
	next_id: u64,
}

impl std::fmt::Debug for GenericEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GenericEngine")
			.field("roots", &self.roots)
			.finish_non_exhaustive()
	}
}

impl GenericEngine {
	pub fn new() -> Result<Self, EngineError> {
		let (events_tx, events_rx) = chan::unbounded();

		let watcher = RecommendedWatcher::new(
			move |result| {
				if events_tx.is_closed() {
					error!("Tried to send file system events to a closed channel;");
				} else if events_tx.send_blocking(result).is_err() {
					// unbounded, so this never blocks the backend thread
					error!("Unable to send watcher event to the engine;");
				}
			},
			Config::default(),
		)?;

		Ok(Self {
			watcher,
			events_rx,
			roots: HashMap::new(),
			next_id: 0,
		})
	}

	fn is_excluded(&self, path: &Path) -> bool {
		let mut covering = self
			.roots
			.values()
			.filter(|root| is_parent_path(&root.path, path))
			.peekable();

		// an event outside every root can only be a stray one from a just-removed watch
		covering.peek().is_none()
			|| covering.all(|root| {
				root.exclusions
					.iter()
					.any(|excluded| is_parent_path(excluded, path))
			})
	}

	fn is_root(&self, path: &Path) -> bool {
		self.roots.values().any(|root| root.path == path)
	}

	fn translate(&self, event: Event, out: &mut Vec<RawEvent>) {
		if event.need_rescan() {
			out.push(RawEvent::overflow());
			return;
		}

		let masks: Vec<(usize, EventMask)> = match event.kind {
			EventKind::Create(_) => vec![(0, EventMask::CREATE)],
			EventKind::Modify(ModifyKind::Metadata(_)) => vec![(0, EventMask::ATTRIB)],
			EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
				vec![(0, EventMask::MOVED_FROM)]
			}
			EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![(0, EventMask::MOVED_TO)],
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
				vec![(0, EventMask::MOVED_FROM), (1, EventMask::MOVED_TO)]
			}
			EventKind::Modify(ModifyKind::Name(_)) => {
				// FSEvents does not tell which side of the rename this is
				let Some(path) = event.paths.first() else {
					return;
				};
				if path.exists() {
					vec![(0, EventMask::MOVED_TO)]
				} else {
					vec![(0, EventMask::MOVED_FROM)]
				}
			}
			EventKind::Modify(_) => vec![(0, EventMask::MODIFY)],
			EventKind::Remove(_) => vec![(0, EventMask::DELETE)],
			EventKind::Access(_) | EventKind::Any | EventKind::Other => {
				trace!(?event, "Ignoring event");
				return;
			}
		};

		for (index, mut mask) in masks {
			let Some(path) = event.paths.get(index) else {
				continue;
			};

			if self.is_excluded(path) {
				continue;
			}

			if mask.is_deletion() && self.is_root(path) {
				mask |= EventMask::DELETE_SELF;
			}

			out.push(RawEvent::new(path.clone(), mask));
		}
	}
}

impl WatchEngine for GenericEngine {
	fn watch(&mut self, root: &str, exclusions: &[PathBuf]) -> Result<WatchId, WatchError> {
		let (path, flat) = unflatten(root);
		let path = PathBuf::from(path);

		match fs::metadata(&path) {
			Ok(metadata) if metadata.is_dir() => {}
			Ok(_) => return Err(WatchError::Ignored(path)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(WatchError::Missing(path)),
			Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
				return Err(WatchError::Ignored(path))
			}
			Err(e) => return Err(WatchError::Failed { path, source: e }),
		}

		let mode = if flat {
			RecursiveMode::NonRecursive
		} else {
			RecursiveMode::Recursive
		};

		if let Err(e) = self.watcher.watch(&path, mode) {
			return Err(match e.kind {
				notify::ErrorKind::PathNotFound => WatchError::Missing(path),
				notify::ErrorKind::MaxFilesWatch => {
					warn!(path = %path.display(), "Native watch limit reached;");
					WatchError::LimitReached(path)
				}
				notify::ErrorKind::Io(source) => WatchError::Failed { path, source },
				other => WatchError::Abort(format!("{other:?}")),
			});
		}

		let id = WatchId::new(self.next_id);
		self.next_id += 1;
		self.roots.insert(
			id,
			GenericRoot {
				path,
				exclusions: exclusions.to_vec(),
			},
		);

		debug!(%id, root, "Root watched");

		Ok(id)
	}

	fn unwatch(&mut self, id: WatchId) {
		let Some(root) = self.roots.remove(&id) else {
			trace!(%id, "Tried to unwatch an unknown root");
			return;
		};

		// the backend keys watches by path, keep it alive while another root still uses it
		if self.roots.values().any(|other| other.path == root.path) {
			return;
		}

		if let Err(e) = self.watcher.unwatch(&root.path) {
			debug!(?e, path = %root.path.display(), "Unable to unwatch root;");
		}
	}

	fn drain(&mut self) -> Result<Vec<RawEvent>, EngineError> {
		let mut out = Vec::new();

		loop {
			match self.events_rx.try_recv() {
				Ok(Ok(event)) => self.translate(event, &mut out),
				Ok(Err(e)) => error!(?e, "Watcher error;"),
				Err(chan::TryRecvError::Empty) => break,
				Err(chan::TryRecvError::Closed) => {
					return Err(EngineError::Abort(
						"native event channel disconnected".to_string(),
					))
				}
			}
		}

		Ok(out)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	fn engine_with_root(root: &Path, exclusions: &[PathBuf]) -> GenericEngine {
		let mut engine = GenericEngine::new().unwrap();
		engine
			.watch(root.to_str().unwrap(), exclusions)
			.unwrap();
		engine
	}

	fn translated(engine: &GenericEngine, event: Event) -> Vec<RawEvent> {
		let mut out = Vec::new();
		engine.translate(event, &mut out);
		out
	}

	#[test]
	fn test_missing_root() {
		let dir = tempdir().unwrap();
		let mut engine = GenericEngine::new().unwrap();
		assert!(matches!(
			engine.watch(dir.path().join("nope").to_str().unwrap(), &[]),
			Err(WatchError::Missing(_))
		));
	}

	#[test]
	fn test_drain_delivers_backend_events() {
		let dir = tempdir().unwrap();
		let root = dir.path().canonicalize().unwrap();
		let mut engine = engine_with_root(&root, &[]);

		let file = root.join("file.txt");
		fs::write(&file, b"x").unwrap();

		// the backend reports from its own thread
		let mut events = Vec::new();
		for _ in 0..100 {
			events.extend(engine.drain().unwrap());
			if events.iter().any(|event| event.path == file) {
				break;
			}
			std::thread::sleep(std::time::Duration::from_millis(20));
		}

		assert!(
			events
				.iter()
				.any(|event| event.path == file && event.mask.contains(EventMask::CREATE)),
			"{events:?}"
		);
	}

	#[test]
	fn test_translate_kinds() {
		let dir = tempdir().unwrap();
		let engine = engine_with_root(dir.path(), &[]);
		let file = dir.path().join("file");

		let created = Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone());
		assert_eq!(
			translated(&engine, created),
			vec![RawEvent::new(file.clone(), EventMask::CREATE)]
		);

		let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
			.add_path(file.clone());
		assert_eq!(
			translated(&engine, modified),
			vec![RawEvent::new(file.clone(), EventMask::MODIFY)]
		);

		let chmod = Event::new(EventKind::Modify(ModifyKind::Metadata(
			MetadataKind::Permissions,
		)))
		.add_path(file.clone());
		assert_eq!(
			translated(&engine, chmod),
			vec![RawEvent::new(file.clone(), EventMask::ATTRIB)]
		);

		let renamed = dir.path().join("renamed");
		let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
			.add_path(file.clone())
			.add_path(renamed.clone());
		assert_eq!(
			translated(&engine, both),
			vec![
				RawEvent::new(file, EventMask::MOVED_FROM),
				RawEvent::new(renamed, EventMask::MOVED_TO),
			]
		);
	}

	#[test]
	fn test_root_removal_sets_delete_self() {
		let dir = tempdir().unwrap();
		let engine = engine_with_root(dir.path(), &[]);

		let removed =
			Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(dir.path().to_path_buf());
		assert_eq!(
			translated(&engine, removed),
			vec![RawEvent::new(
				dir.path(),
				EventMask::DELETE | EventMask::DELETE_SELF
			)]
		);
	}

	#[test]
	fn test_excluded_paths_are_filtered() {
		let dir = tempdir().unwrap();
		let excluded = dir.path().join("mnt");
		let engine = engine_with_root(dir.path(), &[excluded.clone()]);

		let inside = Event::new(EventKind::Create(CreateKind::File)).add_path(excluded.join("x"));
		assert!(translated(&engine, inside).is_empty());
	}

	#[test]
	fn test_rescan_maps_to_overflow() {
		let dir = tempdir().unwrap();
		let engine = engine_with_root(dir.path(), &[]);

		let rescan = Event::new(EventKind::Other).set_flag(notify::event::Flag::Rescan);
		assert_eq!(translated(&engine, rescan), vec![RawEvent::overflow()]);
	}
}
