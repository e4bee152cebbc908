use std::{io, path::PathBuf};

use thiserror::Error;

/// Why a root could not be handed a native watch.
#[derive(Debug, Error)]
pub enum WatchError {
	/// The root does not exist right now; it may come back later.
	#[error("watch root is missing: <path='{}'>", .0.display())]
	Missing(PathBuf),
	/// The root exists but cannot be traversed (access denied, not a directory, symlink loop).
	#[error("watch root ignored: <path='{}'>", .0.display())]
	Ignored(PathBuf),
	/// The per-user native watch limit was hit while walking the root.
	#[error("native watch limit reached while watching: <path='{}'>", .0.display())]
	LimitReached(PathBuf),
	/// Any other failure confined to this root.
	#[error("unable to watch root: <path='{}'>: {source}", path.display())]
	Failed {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	/// The engine is in a state it cannot continue from.
	#[error("watch engine aborted: {0}")]
	Abort(String),
}

/// Engine-wide failures, outside the scope of a single root.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Per-user limit of native notification instances reached.
	#[error("native notification instance limit reached")]
	InstanceLimit,
	#[error("unable to initialize native notifications: {0}")]
	Init(#[source] io::Error),
	#[error("unable to read native event queue: {0}")]
	Read(#[source] io::Error),
	#[error("watch engine aborted: {0}")]
	Abort(String),
}

impl From<notify::Error> for EngineError {
	fn from(e: notify::Error) -> Self {
		match e.kind {
			notify::ErrorKind::Io(io_err) => Self::Init(io_err),
			notify::ErrorKind::MaxFilesWatch => Self::InstanceLimit,
			other => Self::Abort(format!("{other:?}")),
		}
	}
}
