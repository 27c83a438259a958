//! # Logging Utilities
//!
//! `tracing` subscriber setup for symscope.
//!
//! The library crates only emit events; binaries call one of the `init_*`
//! functions here exactly once at startup.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `RUST_LOG=symscope_core::stabs=trace`)
//! - `SYMSCOPE_LOG_FORMAT`: `pretty` (default) or `json`
//! - `SYMSCOPE_LOG_FILE`: also write to this file, rotated daily
//!
//! ## Example
//!
//! ```rust,no_run
//! use symscope_utils::{LogFormat, LogLevel, init_logging_with_level};
//!
//! init_logging_with_level(LogLevel::Debug, LogFormat::Pretty).expect("Failed to initialize logging");
//! tracing::info!("ready");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Keeps the non-blocking file writer flushing for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Initialize logging from the environment.
///
/// `RUST_LOG` picks the filter (default `info`), `SYMSCOPE_LOG_FORMAT` the
/// format and `SYMSCOPE_LOG_FILE` an optional extra file sink.
///
/// ## Errors
///
/// Returns an error if a subscriber is already installed, if
/// `SYMSCOPE_LOG_FORMAT` is not a known format, or if the log file's
/// directory cannot be created.
pub fn init_logging() -> Result<(), LoggingError>
{
    let format = match env::var("SYMSCOPE_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Pretty,
    };
    install(format, None, env_file())
}

/// Initialize logging with an explicit level; `RUST_LOG` is ignored.
///
/// ## Errors
///
/// Returns an error if a subscriber is already installed or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    install(format, Some(level.into()), env_file())
}

/// Log only to a dated file (`YYYY-MM-DD-symscope.log`) inside `dir`.
///
/// Used when stdout belongs to the command's own output. Returns the file path.
///
/// ## Errors
///
/// Returns an error if `dir` cannot be created or a subscriber is already installed.
pub fn init_logging_to_dir(dir: &Path, level: Option<LogLevel>) -> Result<PathBuf, LoggingError>
{
    std::fs::create_dir_all(dir)?;
    let log_file = dir.join(format!("{}-symscope.log", Utc::now().format("%Y-%m-%d")));

    let filter = filter_for(level.map(Into::into));
    let layer = file_layer(&log_file, LogFormat::Pretty, false).with_filter(filter).boxed();
    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(log_file)
}

fn env_file() -> Option<PathBuf>
{
    env::var_os("SYMSCOPE_LOG_FILE").map(PathBuf::from)
}

/// An explicit level wins over `RUST_LOG`, which wins over `info`.
fn filter_for(explicit: Option<Level>) -> EnvFilter
{
    match explicit {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn install(format: LogFormat, level: Option<Level>, log_file: Option<PathBuf>) -> Result<(), LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(format).with_filter(filter_for(level)).boxed()];

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        layers.push(file_layer(&path, format, true).with_filter(filter_for(level)).boxed());
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_writer(io::stderr)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, rotate: bool) -> BoxedLayer
{
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name().unwrap_or_default();
    let appender = if rotate {
        tracing_appender::rolling::daily(dir, name)
    } else {
        tracing_appender::rolling::never(dir, name)
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // Only one subscriber can be installed, so a second guard is never needed.
    let _ = FILE_GUARD.set(guard);

    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A global subscriber was already set
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert!(matches!(
            LogFormat::from_str("xml"),
            Err(LoggingError::InvalidFormat(value)) if value == "xml"
        ));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
    }

    #[test]
    fn test_explicit_level_overrides_env()
    {
        let filter = filter_for(Some(Level::DEBUG));
        assert!(filter.to_string().to_lowercase().contains("debug"));
    }
}
