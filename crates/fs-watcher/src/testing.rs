//! In-memory engine for exercising engine consumers without a kernel.

use crate::{EngineError, RawEvent, WatchEngine, WatchError, WatchId};

use std::{
	collections::{HashMap, VecDeque},
	path::PathBuf,
};

/// Outcome a [`FakeEngine`] should produce for the next `watch` of a root
#[derive(Debug, Clone)]
pub enum FakeOutcome {
	Missing,
	Ignored,
	LimitReached,
	Abort,
}

/// A `watch` call as the engine received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchCall {
	pub root: String,
	pub exclusions: Vec<PathBuf>,
}

/// Records calls and replays scripted outcomes and events.
#[derive(Debug, Default)]
pub struct FakeEngine {
	pub watch_calls: Vec<WatchCall>,
	pub unwatch_calls: Vec<WatchId>,
	/// Ids handed out and not yet released
	pub active: HashMap<WatchId, String>,
	outcomes: HashMap<String, VecDeque<FakeOutcome>>,
	pending: Vec<RawEvent>,
	drain_error: Option<String>,
	next_id: u64,
}

impl FakeEngine {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue an outcome for the next `watch` of `root`; roots without one succeed.
	pub fn script(&mut self, root: impl Into<String>, outcome: FakeOutcome) {
		self.outcomes
			.entry(root.into())
			.or_default()
			.push_back(outcome);
	}

	pub fn push_event(&mut self, event: RawEvent) {
		self.pending.push(event);
	}

	/// Make the next `drain` fail with an abort.
	pub fn fail_next_drain(&mut self, reason: impl Into<String>) {
		self.drain_error = Some(reason.into());
	}

	pub fn watched_roots(&self) -> Vec<&str> {
		let mut roots = self
			.active
			.iter()
			.map(|(id, root)| (*id, root.as_str()))
			.collect::<Vec<_>>();
		roots.sort();
		roots.into_iter().map(|(_, root)| root).collect()
	}
}

impl WatchEngine for FakeEngine {
	fn watch(&mut self, root: &str, exclusions: &[PathBuf]) -> Result<WatchId, WatchError> {
		self.watch_calls.push(WatchCall {
			root: root.to_string(),
			exclusions: exclusions.to_vec(),
		});

		let path = PathBuf::from(crate::unflatten(root).0);
		match self
			.outcomes
			.get_mut(root)
			.and_then(VecDeque::pop_front)
		{
			Some(FakeOutcome::Missing) => Err(WatchError::Missing(path)),
			Some(FakeOutcome::Ignored) => Err(WatchError::Ignored(path)),
			Some(FakeOutcome::LimitReached) => Err(WatchError::LimitReached(path)),
			Some(FakeOutcome::Abort) => Err(WatchError::Abort("scripted abort".to_string())),
			None => {
				let id = WatchId::new(self.next_id);
				self.next_id += 1;
				self.active.insert(id, root.to_string());
				Ok(id)
			}
		}
	}

	fn unwatch(&mut self, id: WatchId) {
		self.unwatch_calls.push(id);
		self.active.remove(&id);
	}

	fn drain(&mut self) -> Result<Vec<RawEvent>, EngineError> {
		if let Some(reason) = self.drain_error.take() {
			return Err(EngineError::Abort(reason));
		}

		Ok(std::mem::take(&mut self.pending))
	}
}
