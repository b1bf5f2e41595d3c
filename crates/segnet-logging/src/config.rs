//! Configuration types for the logging system

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What a zone process logs, and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for the console; `RUST_LOG` wins when set
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Append-only zone event log
    pub event_log: Option<EventLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            event_log: None,
        }
    }
}

impl LogConfig {
    /// Pretty console at debug level, for a terminal
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                format: ConsoleFormat::Pretty,
                ansi: true,
            },
            event_log: None,
        }
    }

    /// JSONL console plus the zone's event log under `log_dir`
    pub fn for_zone(log_dir: impl AsRef<Path>, zone: &str) -> Self {
        Self {
            event_log: Some(EventLogConfig::for_zone(log_dir, zone)),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    /// One JSON object per line, fields flattened, with the zone span
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: ConsoleFormat,
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Json,
            ansi: false,
        }
    }
}

/// Zone event log: one JSON line per zone event, never truncated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogConfig {
    pub path: PathBuf,
}

impl EventLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<log_dir>/<zone>.events.jsonl`
    pub fn for_zone(log_dir: impl AsRef<Path>, zone: &str) -> Self {
        Self::new(log_dir.as_ref().join(format!("{zone}.events.jsonl")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_config_writes_event_log() {
        let config = LogConfig::for_zone("/var/log/segnet", "forecast_zone");
        assert_eq!(
            config.event_log.unwrap().path,
            PathBuf::from("/var/log/segnet/forecast_zone.events.jsonl")
        );
        assert_eq!(config.console.format, ConsoleFormat::Json);
    }

    #[test]
    fn test_development_is_pretty() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert_eq!(config.console.format, ConsoleFormat::Pretty);
        assert!(config.event_log.is_none());
    }
}
