//!
//! # fsnotifier core
//!
//! Keeps the set of watched roots consistent with what the host asked for:
//! - roots below unwatchable mounts are refused, roots containing them are watched around them;
//! - roots that disappear are remembered and restored once their path is back;
//! - raw engine events become `CREATE`, `CHANGE`, `STATS`, `DELETE` and `RESET` lines.
//!
//! [`Notifier`] ties it together and runs the steady-state loop on a single task.

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

pub mod classifier;
pub mod config;
mod context;
pub mod error;
pub mod input;
pub mod mounts;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod root;

pub use config::{Config, LogLevel};
pub use context::Notifier;
pub use error::{MountError, NotifierError};
pub use mounts::{MountSource, MountTable};
pub use protocol::ProtocolWriter;
pub use registry::RootRegistry;
pub use root::{RootState, WatchRoot};
