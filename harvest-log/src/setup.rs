use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt as tracing_fmt};

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// The level of verbosity of the logger.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Disables logging entirely.
    Off,
    /// Only errors.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages and above.
    Info,
    /// Debug messages and above.
    Debug,
    /// Everything.
    Trace,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "off" => Self::Off,
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return Err(ParseLevelError),
        })
    }
}

/// Error returned when parsing an unknown [`Level`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseLevelError;

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid log level, expected one of off, error, warn, info, debug, trace")
    }
}

impl std::error::Error for ParseLevelError {}

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO harvest::setup: launching harvest simulation
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-12-04T12:10:32.123Z  INFO harvest::setup: launching harvest simulation
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-12-04T12:11:08.729716Z","level":"INFO","target":"harvest::setup","message":"launching harvest simulation"}
    /// ```
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for all harvest crates.
    pub level: Level,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE` variable to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Builds the default filter: `INFO` for third-party crates, the configured level for ours.
fn default_filter(level: Level) -> EnvFilter {
    let mut directives = String::from("info");

    for name in CRATE_NAMES {
        directives.push_str(&format!(",{name}={level}"));
    }

    EnvFilter::new(directives)
}

/// Initialize the logging system.
///
/// The `RUST_LOG` environment variable takes precedence over the configured level if set.
/// Calling this more than once has no effect.
///
/// # Example
///
/// ```
/// let log_config = harvest_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// harvest_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: logging is initialized once during startup, before any threads are spawned
        // that could read the environment concurrently.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => default_filter(config.level),
    };

    let format = (config.format, console::user_attended());
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => tracing_fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => tracing_fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        (LogFormat::Json, _) => tracing_fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init().ok();
}
