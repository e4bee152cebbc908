//! The notifier context and its steady-state loop.

use crate::{
	classifier::process_event,
	config::Config,
	error::NotifierError,
	input::{Command, CommandReader},
	mounts::MountSource,
	poller::RecoveryPoller,
	protocol::ProtocolWriter,
	registry::RootRegistry,
};

use std::io::Write;

use fsn_fs_watcher::WatchEngine;
use tokio::{
	io::AsyncBufRead,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, instrument, trace};

/// Everything a running notifier owns. All mutation happens on the task driving [`Notifier::run`].
pub struct Notifier<E, M, W: Write> {
	config: Config,
	registry: RootRegistry,
	engine: E,
	mounts: M,
	out: ProtocolWriter<W>,
	poller: RecoveryPoller,
}

impl<E, M, W> std::fmt::Debug for Notifier<E, M, W>
where
	W: Write,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Notifier")
			.field("config", &self.config)
			.field("registry", &self.registry)
			.field("out", &self.out)
			.finish_non_exhaustive()
	}
}

impl<E, M, W> Notifier<E, M, W>
where
	E: WatchEngine,
	M: MountSource,
	W: Write,
{
	pub fn new(config: Config, engine: E, mounts: M, out: ProtocolWriter<W>) -> Self {
		let poller = RecoveryPoller::new(config.missing_root_interval);

		Self {
			config,
			registry: RootRegistry::new(),
			engine,
			mounts,
			out,
			poller,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn registry(&self) -> &RootRegistry {
		&self.registry
	}

	pub fn engine(&self) -> &E {
		&self.engine
	}

	pub fn engine_mut(&mut self) -> &mut E {
		&mut self.engine
	}

	pub fn writer(&self) -> &ProtocolWriter<W> {
		&self.out
	}

	pub fn writer_mut(&mut self) -> &mut ProtocolWriter<W> {
		&mut self.out
	}

	pub fn update_roots(&mut self, roots: Vec<String>) -> Result<(), NotifierError> {
		self.registry
			.update_roots(&mut self.engine, &self.mounts, &mut self.out, roots)
	}

	/// Drain the engine, report what it saw, then give missing roots a chance to come back.
	pub fn tick(&mut self, now: Instant) -> Result<(), NotifierError> {
		let events = self.engine.drain().map_err(NotifierError::Engine)?;

		if !events.is_empty() {
			trace!(count = events.len(), "Processing raw events");
		}

		for event in &events {
			process_event(&mut self.registry, &mut self.engine, &mut self.out, event)
				.map_err(NotifierError::Output)?;
		}

		self.poller
			.poll(now, &mut self.registry, &mut self.engine, &mut self.out)
			.map_err(NotifierError::Output)?;

		Ok(())
	}

	/// Serve host commands from `input` until `EXIT`, end of input, or a fatal error.
	#[instrument(skip_all, fields(tick = ?self.config.tick_interval))]
	pub async fn run<R>(&mut self, input: R) -> Result<(), NotifierError>
	where
		R: AsyncBufRead + Unpin,
	{
		let mut commands = CommandReader::new(input);

		let mut ticker = interval_at(
			Instant::now() + self.config.tick_interval,
			self.config.tick_interval,
		);
		// In case of doubt check: https://docs.rs/tokio/latest/tokio/time/enum.MissedTickBehavior.html
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		info!("Waiting for host commands");

		loop {
			tokio::select! {
				command = commands.next_command() => {
					match command.map_err(NotifierError::Input)? {
						Command::Roots(roots) => self.update_roots(roots)?,
						Command::Exit => {
							debug!("Exit requested");
							break;
						}
					}
				}

				now = ticker.tick() => self.tick(now)?,
			}
		}

		Ok(())
	}

	/// Release every native watch.
	pub fn shutdown(&mut self) {
		self.registry.unregister_all(&mut self.engine);
	}

	/// One registration of `root`, a single drain, and release.
	#[instrument(skip(self))]
	pub fn self_test(&mut self, root: String) -> Result<(), NotifierError> {
		info!("Starting self test");

		self.update_roots(vec![root])?;
		self.tick(Instant::now())?;

		info!(
			roots = self.registry.len(),
			missing = self.registry.missing_count(),
			"Self test finished",
		);

		self.shutdown();

		Ok(())
	}
}
