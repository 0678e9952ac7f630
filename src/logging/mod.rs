//! Logging subsystem
//!
//! Structured logging via tracing, JSON in production and plaintext in
//! development.
//!
//! # Log Targets
//!
//! - `sanitizer` - gadget content sanitization
//! - `proxy` - proxy requests and upstream fetches
//! - `http` - HTTP server
//! - `config` - configuration loading
//!
//! # Environment Variables
//!
//! - `GADGET_SHIELD_LOG` - primary filter (takes precedence)
//! - `RUST_LOG` - fallback filter

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::defaults::{LogFormatSetting, LoggingSection};

pub const LOG_ENV: &str = "GADGET_SHIELD_LOG";

static INIT_GUARD: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Plaintext,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Used when neither env var is set.
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Self::default()
        }
    }

    /// From the `logging` config section. An unrecognised level falls back
    /// to INFO.
    pub fn from_section(section: &LoggingSection) -> Self {
        let format = match section.format {
            LogFormatSetting::Json => LogFormat::Json,
            LogFormatSetting::Plaintext => LogFormat::Plaintext,
        };
        Self {
            format,
            output: LogOutput::Stdout,
            default_level: Level::from_str(&section.level).unwrap_or(Level::INFO),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// `GADGET_SHIELD_LOG`, then `RUST_LOG`, then `default_level` for every
/// crate target.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    for var in [LOG_ENV, "RUST_LOG"] {
        if let Ok(filter) = std::env::var(var) {
            return Ok(EnvFilter::try_new(filter)?);
        }
    }

    let level = default_level.as_str().to_lowercase();
    let directives = [
        targets::SANITIZER,
        targets::PROXY,
        targets::HTTP,
        targets::CONFIG,
    ]
    .iter()
    .fold(level.clone(), |acc, target| format!("{acc},{target}={level}"));
    Ok(EnvFilter::try_new(directives)?)
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => BoxMakeWriter::new(Arc::new(File::create(path)?)),
    })
}

fn build_layer(
    config: &LogConfig,
) -> Result<Box<dyn Layer<Registry> + Send + Sync + 'static>, LoggingError> {
    let filter = build_env_filter(config.default_level)?;
    let writer = make_writer(&config.output)?;
    let timer = UtcTime::rfc_3339();

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };
    Ok(layer)
}

/// Install the global subscriber. Only the first call succeeds.
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    tracing_subscriber::registry()
        .with(build_layer(&config)?)
        .try_init()?;
    Ok(())
}

/// Plaintext debug logging for tests; safe to call repeatedly.
pub fn init_test_logging() {
    if let Ok(layer) = build_layer(&LogConfig::development()) {
        let _ = tracing_subscriber::registry().with(layer).try_init();
    }
}

pub mod targets {
    pub const SANITIZER: &str = "sanitizer";
    pub const PROXY: &str = "proxy";
    pub const HTTP: &str = "http";
    pub const CONFIG: &str = "config";
}
