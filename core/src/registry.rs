//! Requested roots and the native watches backing them.

use crate::{
	error::NotifierError,
	mounts::MountSource,
	protocol::{Message, ProtocolWriter},
	root::{RootState, WatchRoot},
};

use std::{
	io::Write,
	path::{Path, PathBuf},
};

use fsn_fs_watcher::{is_parent_path, unflatten, WatchEngine, WatchError};
use tracing::{debug, info, instrument, warn};

/// Requesting this alone is refused outright
pub const FILESYSTEM_ROOT: &str = "/";

#[derive(Debug, Default)]
pub struct RootRegistry {
	roots: Vec<WatchRoot>,
}

impl RootRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn roots(&self) -> &[WatchRoot] {
		&self.roots
	}

	pub fn len(&self) -> usize {
		self.roots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.roots.is_empty()
	}

	pub(crate) fn roots_mut(&mut self) -> impl Iterator<Item = &mut WatchRoot> {
		self.roots.iter_mut()
	}

	pub fn missing_count(&self) -> usize {
		self.roots.iter().filter(|root| root.is_missing()).count()
	}

	/// Replace the whole root set.
	///
	/// Every current root is released first, even when `new_roots` is empty. Unless the list is
	/// empty or only holds `/`, a single `UNWATCHEABLE` block and `INITIALIZED` follow.
	#[instrument(skip_all, fields(current = self.roots.len(), new = new_roots.len()))]
	pub fn update_roots<E, M, W>(
		&mut self,
		engine: &mut E,
		mounts: &M,
		out: &mut ProtocolWriter<W>,
		new_roots: Vec<String>,
	) -> Result<(), NotifierError>
	where
		E: WatchEngine,
		M: MountSource,
		W: Write,
	{
		info!("Updating roots");

		self.unregister_all(engine);

		if new_roots.is_empty() {
			return Ok(());
		}

		if new_roots.len() == 1 && new_roots[0] == FILESYSTEM_ROOT {
			warn!("Refusing to watch the whole filesystem;");
			return out
				.unwatchable(&[FILESYSTEM_ROOT])
				.map_err(NotifierError::Output);
		}

		let mounts = mounts.unwatchable_mounts()?;

		let unwatchable = self.register_roots(engine, out, new_roots, &mounts)?;

		out.unwatchable(&unwatchable)
			.and_then(|()| out.initialized())
			.map_err(NotifierError::Output)?;

		info!(
			registered = self.roots.len(),
			unwatchable = unwatchable.len(),
			"Roots updated"
		);

		Ok(())
	}

	/// Release every native watch and forget all roots.
	pub fn unregister_all<E: WatchEngine>(&mut self, engine: &mut E) {
		for mut root in self.roots.drain(..) {
			info!(%root, "Unregistering root");
			if let Some(id) = root.take_watch() {
				engine.unwatch(id);
			}
		}
	}

	fn register_roots<E, W>(
		&mut self,
		engine: &mut E,
		out: &mut ProtocolWriter<W>,
		new_roots: Vec<String>,
		mounts: &[PathBuf],
	) -> Result<Vec<PathBuf>, NotifierError>
	where
		E: WatchEngine,
		W: Write,
	{
		let mut unwatchable = Vec::new();

		for new_root in new_roots {
			info!(root = %new_root, "Registering root");

			let unflattened = Path::new(unflatten(&new_root).0);

			if !unflattened.is_absolute() {
				warn!(root = %new_root, "Invalid root, it must be an absolute path;");
				continue;
			}

			if let Some(mount) = mounts.iter().find(|mount| is_parent_path(mount, unflattened)) {
				info!(
					root = %unflattened.display(),
					mount = %mount.display(),
					"Watch root is under an unwatchable mount point, skipping",
				);
				unwatchable.push(unflattened.to_path_buf());
				continue;
			}

			let exclusions = mounts
				.iter()
				.filter(|mount| is_parent_path(unflattened, mount))
				.inspect(|mount| {
					info!(
						root = %unflattened.display(),
						mount = %mount.display(),
						"Watch root contains an unwatchable mount point, partial watch",
					)
				})
				.cloned()
				.collect::<Vec<_>>();

			unwatchable.extend(exclusions.iter().cloned());

			match engine.watch(&new_root, &exclusions) {
				Ok(id) => {
					debug!(root = %new_root, %id, "Root watched");
					self.roots.push(WatchRoot::active(new_root, id));
				}

				Err(WatchError::Missing(_)) => {
					info!(root = %new_root, "Root is missing, waiting for it to show up");
					self.roots.push(WatchRoot::missing(new_root));
				}

				Err(WatchError::Abort(reason)) => {
					return Err(NotifierError::RegistrationAborted(reason));
				}

				Err(e) => {
					warn!(?e, root = %unflattened.display(), "Watch root cannot be watched;");

					if matches!(e, WatchError::LimitReached(_)) {
						out.message(Message::WatchLimit)
							.map_err(NotifierError::Output)?;
					}

					unwatchable.push(unflattened.to_path_buf());
				}
			}
		}

		Ok(unwatchable)
	}

	/// The root at `path` went away under a live watch: release it and mark it missing.
	///
	/// Returns how many roots matched, duplicates included.
	pub fn mark_removed<E: WatchEngine>(&mut self, engine: &mut E, path: &Path) -> usize {
		let mut removed = 0;

		for root in self
			.roots
			.iter_mut()
			.filter(|root| matches!(root.state, RootState::Active(_)) && root.unflattened() == path)
		{
			if let Some(id) = root.take_watch() {
				engine.unwatch(id);
			}
			info!(%root, "Root deleted");
			removed += 1;
		}

		removed
	}
}
