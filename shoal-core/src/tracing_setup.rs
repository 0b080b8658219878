//! Log output for the `shoal` binary.
//!
//! The terminal shows what the operator asked for with `--log-level`. Every
//! event of the run, refresher ticks included, also lands in
//! `logs/shoal-last-run.log`, which each start truncates.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE_NAME: &str = "shoal-last-run.log";

/// Environment variable holding console filter directives, in
/// `EnvFilter` syntax. Takes precedence over `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "SHOAL_LOG";

/// Held at `info` on the console when the chosen level is more verbose.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=info", "tower_http=info", "reqwest=info"];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Cannot prepare log file {}: {source}", path.display())]
    LogFile { path: PathBuf, source: io::Error },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Installs the console and trace-file subscriber.
///
/// `logs_dir` defaults to `./logs`.
///
/// # Errors
/// - `TracingError::LogFile` - Logs directory or file could not be created
/// - `TracingError::AlreadyInstalled` - Called twice in one process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<(), TracingError> {
    let (log_path, log_file) = open_trace_file(logs_dir.unwrap_or_else(|| Path::new("logs")))?;

    let console = fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter(console_level));

    let trace_file = fmt::layer()
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(Mutex::new(log_file))
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console)
        .with(trace_file)
        .try_init()?;

    tracing::info!(
        "Logging to console at {} and to {}",
        console_level,
        log_path.display()
    );
    Ok(())
}

fn open_trace_file(dir: &Path) -> Result<(PathBuf, File), TracingError> {
    let path = dir.join(LOG_FILE_NAME);
    let opened = fs::create_dir_all(dir).and_then(|()| File::create(&path));
    match opened {
        Ok(file) => Ok((path, file)),
        Err(source) => Err(TracingError::LogFile { path, source }),
    }
}

/// `SHOAL_LOG`, then `RUST_LOG`, then `level` with HTTP crates held at info.
fn console_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: Level) -> String {
    let mut directives = vec![level.to_string().to_lowercase()];
    if level > Level::INFO {
        directives.extend(QUIET_DEPENDENCIES.iter().map(ToString::to_string));
    }
    directives.join(",")
}

/// `--log-level` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Adds, starts, stops and server lifecycle
    #[default]
    Info,
    /// Range requests and reader setup
    Debug,
    /// Every refresher tick
    Trace,
}

impl CliLogLevel {
    /// # Examples
    /// ```
    /// use shoal_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            Self::Error => Level::ERROR,
            Self::Warn => Level::WARN,
            Self::Info => Level::INFO,
            Self::Debug => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}
