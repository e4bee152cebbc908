use std::{fmt::Display, io, path::Path};

use fsn_fs_watcher::EngineError;
use thiserror::Error;

/// Process exit code for a clean shutdown
pub const EXIT_OK: u8 = 0;
/// Process exit code when watching could not start
pub const EXIT_INIT_FAILED: u8 = 2;
/// Process exit code when the main loop had to abort
pub const EXIT_ABORTED: u8 = 3;

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<&'static str>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}

	pub fn from_std_io_err_with_msg(
		path: impl AsRef<Path>,
		source: io::Error,
		msg: &'static str,
	) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(msg),
		}
	}
}

#[derive(Error, Debug)]
pub enum MountError {
	#[error("unable to open any mount table: {0}")]
	Unreadable(#[from] FileIOError),
}

#[derive(Error, Debug)]
pub enum NotifierError {
	#[error("mount table unavailable: {0}")]
	MountTable(#[from] MountError),
	#[error("watch engine failed to start: {0}")]
	EngineInit(#[source] EngineError),
	#[error("watch engine aborted while registering roots: {0}")]
	RegistrationAborted(String),
	#[error("watch engine failed while draining events: {0}")]
	Engine(#[source] EngineError),
	#[error("unable to read host commands: {0}")]
	Input(#[source] io::Error),
	#[error("unable to write to host: {0}")]
	Output(#[source] io::Error),
}

impl NotifierError {
	/// Failures that happen before the new root set is live are reported as a give-up.
	pub fn is_init_failure(&self) -> bool {
		matches!(self, Self::MountTable(_) | Self::EngineInit(_))
	}

	pub fn exit_code(&self) -> u8 {
		if self.is_init_failure() {
			EXIT_INIT_FAILED
		} else {
			EXIT_ABORTED
		}
	}
}
