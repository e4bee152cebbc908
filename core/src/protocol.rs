//! Line protocol spoken to the host on the output channel.
//!
//! Every message is written and flushed as a whole; the host reads incrementally.

use std::{
	fmt,
	io::{self, Write},
	path::Path,
};

use tracing::debug;

pub const INSTANCE_LIMIT_TEXT: &str = "The <b>inotify</b>(7) instances limit reached. \
	<a href=\"http://confluence.jetbrains.net/display/IDEADEV/Inotify+Instances+Limit\">More details.</a>";

pub const WATCH_LIMIT_TEXT: &str = "The current <b>inotify</b>(7) watch limit is too low. \
	<a href=\"http://confluence.jetbrains.net/display/IDEADEV/Inotify+Watches+Limit\">More details.</a>";

/// Path scoped verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	Create,
	Change,
	Stats,
	Delete,
}

impl EventKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Create => "CREATE",
			Self::Change => "CHANGE",
			Self::Stats => "STATS",
			Self::Delete => "DELETE",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Canned diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
	InstanceLimit,
	WatchLimit,
}

impl Message {
	pub fn text(self) -> &'static str {
		match self {
			Self::InstanceLimit => INSTANCE_LIMIT_TEXT,
			Self::WatchLimit => WATCH_LIMIT_TEXT,
		}
	}
}

pub struct ProtocolWriter<W: Write> {
	out: W,
	muted: bool,
}

impl<W: Write> fmt::Debug for ProtocolWriter<W> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProtocolWriter")
			.field("muted", &self.muted)
			.finish_non_exhaustive()
	}
}

impl<W: Write> ProtocolWriter<W> {
	pub fn new(out: W) -> Self {
		Self { out, muted: false }
	}

	/// Writer that swallows everything, used by self-test runs.
	pub fn muted(out: W) -> Self {
		Self { out, muted: true }
	}

	pub fn get_ref(&self) -> &W {
		&self.out
	}

	pub fn into_inner(self) -> W {
		self.out
	}

	pub fn event(&mut self, kind: EventKind, path: &Path) -> io::Result<()> {
		debug!(%kind, path = %path.display(), "Event");
		self.send(|out| {
			writeln!(out, "{kind}")?;
			write_path(out, path)
		})
	}

	pub fn reset(&mut self) -> io::Result<()> {
		debug!("RESET");
		self.send(|out| writeln!(out, "RESET"))
	}

	/// `UNWATCHEABLE`, one path per line, then the `#` terminator.
	pub fn unwatchable<P: AsRef<Path>>(&mut self, paths: &[P]) -> io::Result<()> {
		self.send(|out| {
			writeln!(out, "UNWATCHEABLE")?;
			for path in paths {
				write_path(out, path.as_ref())?;
			}
			writeln!(out, "#")
		})
	}

	pub fn giveup(&mut self) -> io::Result<()> {
		self.send(|out| writeln!(out, "GIVEUP"))
	}

	pub fn message(&mut self, message: Message) -> io::Result<()> {
		self.send(|out| writeln!(out, "MESSAGE\n{}", message.text()))
	}

	pub fn initialized(&mut self) -> io::Result<()> {
		self.send(|out| writeln!(out, "INITIALIZED"))
	}

	fn send(&mut self, message: impl FnOnce(&mut W) -> io::Result<()>) -> io::Result<()> {
		if self.muted {
			return Ok(());
		}

		message(&mut self.out)?;
		self.out.flush()
	}
}

fn write_path(out: &mut impl Write, path: &Path) -> io::Result<()> {
	out.write_all(path.as_os_str().as_encoded_bytes())?;
	out.write_all(b"\n")
}
