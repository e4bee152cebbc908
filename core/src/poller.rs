//! Brings missing roots back once their path is reachable again.

use crate::{
	protocol::{EventKind, ProtocolWriter},
	registry::RootRegistry,
	root::RootState,
};

use std::{
	io::{self, Write},
	time::Duration,
};

use fsn_fs_watcher::WatchEngine;
use tokio::time::Instant;
use tracing::{debug, info};

/// Rate limits missing root checks on top of the loop's own tick.
#[derive(Debug)]
pub struct RecoveryPoller {
	interval: Duration,
	last_check: Option<Instant>,
}

impl RecoveryPoller {
	pub fn new(interval: Duration) -> Self {
		Self {
			interval,
			last_check: None,
		}
	}

	/// Whether a check is due at `now`, recording it if so.
	pub fn is_due(&mut self, now: Instant) -> bool {
		match self.last_check {
			Some(last) if now.saturating_duration_since(last) < self.interval => false,
			_ => {
				self.last_check = Some(now);
				true
			}
		}
	}

	pub fn poll<E, W>(
		&mut self,
		now: Instant,
		registry: &mut RootRegistry,
		engine: &mut E,
		out: &mut ProtocolWriter<W>,
	) -> io::Result<usize>
	where
		E: WatchEngine,
		W: Write,
	{
		if registry.missing_count() == 0 || !self.is_due(now) {
			return Ok(0);
		}

		check_missing_roots(registry, engine, out)
	}
}

/// Try to watch every missing root whose path exists again; returns how many came back.
///
/// Exclusions are not recomputed on restore.
pub fn check_missing_roots<E, W>(
	registry: &mut RootRegistry,
	engine: &mut E,
	out: &mut ProtocolWriter<W>,
) -> io::Result<usize>
where
	E: WatchEngine,
	W: Write,
{
	let mut restored = 0;

	for root in registry.roots_mut().filter(|root| root.is_missing()) {
		let path = root.unflattened().to_path_buf();

		if let Err(e) = std::fs::metadata(&path) {
			debug!(?e, %root, "Root still missing;");
			continue;
		}

		match engine.watch(&root.path, &[]) {
			Ok(id) => {
				root.state = RootState::Active(id);
				info!(%root, %id, "Root restored");
				out.event(EventKind::Create, &path)?;
				out.event(EventKind::Change, &path)?;
				restored += 1;
			}
			Err(e) => debug!(?e, %root, "Unable to restore root;"),
		}
	}

	Ok(restored)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	use crate::mounts::StaticMounts;

	use fsn_fs_watcher::testing::{FakeEngine, FakeOutcome};
	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	fn output(out: &mut ProtocolWriter<Vec<u8>>) -> String {
		let out = std::mem::replace(out, ProtocolWriter::new(Vec::new()));
		String::from_utf8(out.into_inner()).unwrap()
	}

	#[test]
	fn test_restores_recreated_root() {
		let dir = tempdir().unwrap();
		let root = dir.path().join("project");
		let root_str = root.to_str().unwrap().to_string();

		let mut registry = RootRegistry::new();
		let mut engine = FakeEngine::new();
		let mut out = ProtocolWriter::new(Vec::new());

		engine.script(root_str.clone(), FakeOutcome::Missing);
		registry
			.update_roots(
				&mut engine,
				&StaticMounts::default(),
				&mut out,
				vec![root_str.clone()],
			)
			.unwrap();
		assert_eq!(registry.missing_count(), 1);
		output(&mut out);

		assert_eq!(check_missing_roots(&mut registry, &mut engine, &mut out).unwrap(), 0);
		assert_eq!(output(&mut out), "");
		assert_eq!(engine.watch_calls.len(), 1);

		std::fs::create_dir(&root).unwrap();

		assert_eq!(check_missing_roots(&mut registry, &mut engine, &mut out).unwrap(), 1);
		assert_eq!(
			output(&mut out),
			format!("CREATE\n{root_str}\nCHANGE\n{root_str}\n")
		);
		assert!(registry.roots()[0].watch_id().is_some());
		assert!(engine.watch_calls[1].exclusions.is_empty());
	}

	#[test]
	fn test_failed_restore_stays_missing() {
		let dir = tempdir().unwrap();
		let root = format!("|{}", dir.path().display());

		let mut registry = RootRegistry::new();
		let mut engine = FakeEngine::new();
		let mut out = ProtocolWriter::new(Vec::new());

		engine.script(root.clone(), FakeOutcome::Missing);
		engine.script(root.clone(), FakeOutcome::LimitReached);
		registry
			.update_roots(&mut engine, &StaticMounts::default(), &mut out, vec![root.clone()])
			.unwrap();
		output(&mut out);

		assert_eq!(check_missing_roots(&mut registry, &mut engine, &mut out).unwrap(), 0);
		assert_eq!(output(&mut out), "");
		assert!(registry.roots()[0].is_missing());

		// flattened roots keep their marker when watched again
		assert_eq!(check_missing_roots(&mut registry, &mut engine, &mut out).unwrap(), 1);
		assert_eq!(engine.watched_roots(), vec![root.as_str()]);
	}

	#[test]
	fn test_poller_rate_limit() {
		let start = Instant::now();
		let mut poller = RecoveryPoller::new(Duration::from_secs(1));

		assert!(poller.is_due(start));
		assert!(!poller.is_due(start + Duration::from_millis(50)));
		assert!(!poller.is_due(start + Duration::from_millis(950)));
		assert!(poller.is_due(start + Duration::from_secs(1)));
		assert!(!poller.is_due(start + Duration::from_millis(1500)));
	}
}
