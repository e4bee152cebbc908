use fsn_core::{
	error::EXIT_OK,
	protocol::Message,
	Config, LogLevel, MountTable, Notifier, NotifierError, ProtocolWriter,
};
use fsn_fs_watcher::{EngineError, NativeEngine};

use std::{
	io::{self, Stdout, Write},
	process::ExitCode,
};

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
	name = "fsnotifier",
	version,
	about = "Reports file system changes under the roots requested on standard input",
	after_help = "Verbosity is read from FSNOTIFIER_LOG_LEVEL \
		(debug, info, warning, error, off; default warning). Logs go to standard error."
)]
struct Args {
	/// Watch the current directory once with debug logging, then exit
	#[arg(long)]
	selftest: bool,

	/// Roots to watch before the first command arrives
	roots: Vec<String>,
}

fn init_logging(level: LogLevel) {
	let filter = EnvFilter::default().add_directive(LevelFilter::from(level).into());

	tracing_subscriber::registry()
		.with(filter)
		.with(
			fmt::layer()
				.with_writer(io::stderr)
				.with_ansi(false)
				.with_target(false),
		)
		.init();
}

type StdioNotifier = Notifier<NativeEngine, MountTable, Stdout>;

fn writer(muted: bool) -> ProtocolWriter<Stdout> {
	if muted {
		ProtocolWriter::muted(io::stdout())
	} else {
		ProtocolWriter::new(io::stdout())
	}
}

fn start(config: Config) -> Result<StdioNotifier, NotifierError> {
	let engine = NativeEngine::new().map_err(NotifierError::EngineInit)?;
	let out = writer(config.self_test);

	Ok(Notifier::new(config, engine, MountTable::new(), out))
}

async fn serve(notifier: &mut StdioNotifier, roots: Vec<String>) -> Result<(), NotifierError> {
	if !roots.is_empty() {
		notifier.update_roots(roots)?;
	}

	notifier.run(BufReader::new(tokio::io::stdin())).await
}

fn self_test(notifier: &mut StdioNotifier) -> Result<(), NotifierError> {
	let cwd = std::env::current_dir()
		.map(|cwd| cwd.to_string_lossy().into_owned())
		.unwrap_or_else(|_| ".".to_string());

	notifier.self_test(cwd)
}

/// Tell the host about an init failure before exiting.
fn give_up<W: Write>(out: &mut ProtocolWriter<W>, e: &NotifierError) -> io::Result<()> {
	if matches!(e, NotifierError::EngineInit(EngineError::InstanceLimit)) {
		out.message(Message::InstanceLimit)?;
	}

	out.giveup()
}

fn finish<W: Write>(out: &mut ProtocolWriter<W>, result: Result<(), NotifierError>) -> u8 {
	match result {
		Ok(()) => EXIT_OK,
		Err(e) => {
			error!(?e, "Notifier stopped;");
			if e.is_init_failure() {
				if let Err(e) = give_up(out, &e) {
					error!(?e, "Unable to notify host;");
				}
			}
			e.exit_code()
		}
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let args = Args::parse();

	let mut config = Config::from_env();
	if args.selftest {
		config = config.self_test();
	}

	init_logging(config.log_level);

	info!(
		version = env!("CARGO_PKG_VERSION"),
		self_test = config.self_test,
		"Started"
	);

	let muted = config.self_test;
	let code = match start(config) {
		Ok(mut notifier) => {
			let result = if notifier.config().self_test {
				self_test(&mut notifier)
			} else {
				serve(&mut notifier, args.roots).await
			};

			notifier.shutdown();
			finish(notifier.writer_mut(), result)
		}
		Err(e) => finish(&mut writer(muted), Err(e)),
	};

	info!(code, "Finished");

	ExitCode::from(code)
}
