use std::{env, fmt, str::FromStr, time::Duration};

use tracing::level_filters::LevelFilter;

/// Environment variable selecting log verbosity
pub const LOG_LEVEL_ENV: &str = "FSNOTIFIER_LOG_LEVEL";

/// How often the engine queue is drained
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// How often missing roots are checked for reappearance
pub const MISSING_ROOT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
	Debug,
	Info,
	#[default]
	Warning,
	Error,
	Off,
}

impl LogLevel {
	pub const ALL: [Self; 5] = [Self::Debug, Self::Info, Self::Warning, Self::Error, Self::Off];

	/// Read the level from [`LOG_LEVEL_ENV`], falling back to the default for unset or unknown values.
	pub fn from_env() -> Self {
		env::var(LOG_LEVEL_ENV)
			.ok()
			.and_then(|value| value.parse().ok())
			.unwrap_or_default()
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Debug => "debug",
			Self::Info => "info",
			Self::Warning => "warning",
			Self::Error => "error",
			Self::Off => "off",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLogLevel(pub String);

impl fmt::Display for UnknownLogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unknown log level '{}'", self.0)
	}
}

impl std::error::Error for UnknownLogLevel {}

impl FromStr for LogLevel {
	type Err = UnknownLogLevel;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|level| level.as_str() == s)
			.ok_or_else(|| UnknownLogLevel(s.to_string()))
	}
}

impl From<LogLevel> for LevelFilter {
	fn from(level: LogLevel) -> Self {
		match level {
			LogLevel::Debug => Self::DEBUG,
			LogLevel::Info => Self::INFO,
			LogLevel::Warning => Self::WARN,
			LogLevel::Error => Self::ERROR,
			LogLevel::Off => Self::OFF,
		}
	}
}

/// Runtime settings, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct Config {
	pub log_level: LogLevel,
	pub tick_interval: Duration,
	pub missing_root_interval: Duration,
	/// Watch the working directory once, with the host protocol muted
	pub self_test: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			log_level: LogLevel::default(),
			tick_interval: TICK_INTERVAL,
			missing_root_interval: MISSING_ROOT_INTERVAL,
			self_test: false,
		}
	}
}

impl Config {
	pub fn from_env() -> Self {
		Self {
			log_level: LogLevel::from_env(),
			..Default::default()
		}
	}

	pub fn self_test(mut self) -> Self {
		self.self_test = true;
		self.log_level = LogLevel::Debug;
		self
	}
}
