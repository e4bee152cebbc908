//! Commands the host sends on standard input.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::{trace, warn};

pub const ROOTS_COMMAND: &str = "ROOTS";
pub const EXIT_COMMAND: &str = "EXIT";
pub const BLOCK_TERMINATOR: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	/// Replace the watched roots, in request order
	Roots(Vec<String>),
	Exit,
}

/// Line reader that assembles `ROOTS` blocks.
///
/// Partial blocks are kept between calls, so `next_command` may be dropped at any await
/// point and resumed later without losing input.
pub struct CommandReader<R> {
	lines: Lines<R>,
	block: Option<Vec<String>>,
}

impl<R: AsyncBufRead + Unpin> CommandReader<R> {
	pub fn new(reader: R) -> Self {
		Self {
			lines: reader.lines(),
			block: None,
		}
	}

	/// Next complete command. End of input reads as [`Command::Exit`].
	pub async fn next_command(&mut self) -> io::Result<Command> {
		loop {
			let Some(line) = self.lines.next_line().await? else {
				if let Some(block) = self.block.take() {
					warn!(roots = block.len(), "Input closed inside a ROOTS block;");
				}
				return Ok(Command::Exit);
			};

			trace!(%line, "Read line");

			if let Some(block) = self.block.as_mut() {
				match line.as_str() {
					BLOCK_TERMINATOR => {
						return Ok(Command::Roots(self.block.take().unwrap_or_default()));
					}
					"" => {}
					root => block.push(root.to_string()),
				}
				continue;
			}

			match line.as_str() {
				ROOTS_COMMAND => self.block = Some(Vec::new()),
				EXIT_COMMAND => return Ok(Command::Exit),
				other => warn!(command = other, "Unrecognized command;"),
			}
		}
	}
}
