//! Logging for segnet zone agents
//!
//! Two outputs, both JSON lines by default:
//!
//! - **Console**: every diagnostic at the configured level (`RUST_LOG`
//!   overrides it), pretty-printed in development
//! - **Event log**: an append-only file receiving only zone events (target
//!   `segnet::event`), one line per state transition, whatever the console
//!   level is
//!
//! # Quick Start
//!
//! ```ignore
//! use segnet_logging::{LogConfig, SegnetSubscriberBuilder};
//!
//! let _guards = SegnetSubscriberBuilder::new()
//!     .with_config(LogConfig::for_zone("./logs", "forecast_zone"))
//!     .try_init()?;
//! ```

pub mod config;
pub mod context;

pub use config::{ConsoleConfig, ConsoleFormat, EventLogConfig, LogConfig};
pub use context::ZoneContext;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use segnet_core::EVENT_TARGET;
use thiserror::Error;
use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Cannot open log file {}: {reason}", path.display())]
    File { path: PathBuf, reason: String },

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("A global subscriber is already set")]
    AlreadySet,
}

/// Keeps the non-blocking event log writer flushing; hold until exit
#[must_use = "dropping the guards stops event logging"]
#[derive(Debug, Default)]
pub struct LogGuards {
    guards: Vec<WorkerGuard>,
}

impl LogGuards {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Builder for configuring and initializing the segnet logging subscriber
///
/// By default, console output uses JSONL format and no event log is
/// written. Use `LogConfig::development()` for human-readable output.
#[derive(Debug, Default)]
pub struct SegnetSubscriberBuilder {
    config: LogConfig,
}

impl SegnetSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Human-readable console output instead of JSONL
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.config.console.format = if pretty {
            ConsoleFormat::Pretty
        } else {
            ConsoleFormat::Json
        };
        self.config.console.ansi = pretty;
        self
    }

    /// Append zone events to `path`
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.event_log = Some(EventLogConfig::new(path));
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    pub fn build(self) -> Result<(impl Subscriber + Send + Sync + 'static, LogGuards), LoggingError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guards = LogGuards::default();

        if self.config.console.enabled {
            let filter = self.env_filter()?;
            let layer: BoxedLayer = match self.config.console.format {
                ConsoleFormat::Pretty => fmt::layer()
                    .with_ansi(self.config.console.ansi)
                    .with_target(true)
                    .with_filter(filter)
                    .boxed(),
                ConsoleFormat::Json => fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true)
                    .with_filter(filter)
                    .boxed(),
            };
            layers.push(layer);
        }

        if let Some(event_log) = &self.config.event_log {
            let file = open_append(&event_log.path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            guards.guards.push(guard);
            // zone events only, at any level, and no span noise
            let layer: BoxedLayer = fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .flatten_event(true)
                .with_target(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_target(EVENT_TARGET, LevelFilter::TRACE))
                .boxed();
            layers.push(layer);
        }

        Ok((Registry::default().with(layers), guards))
    }

    /// Install the subscriber globally
    ///
    /// Returns the writer guards, which must be kept alive for the duration
    /// of the program.
    pub fn try_init(self) -> Result<LogGuards, LoggingError> {
        let (subscriber, guards) = self.build()?;
        subscriber.try_init().map_err(|_| LoggingError::AlreadySet)?;
        Ok(guards)
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.config.default_level))
            .map_err(|e| LoggingError::Filter(e.to_string()))
    }
}

fn open_append(path: &Path) -> Result<fs::File, LoggingError> {
    ensure_parent(path)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggingError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn ensure_parent(path: &Path) -> Result<(), LoggingError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| LoggingError::File {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
        }
        _ => Ok(()),
    }
}
