//! Agent configuration and command line
//!
//! Every run option can also come from the environment, so a container
//! only needs `ZONE_NAME` and a mounted schedule.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use segnet_core::{Clock, SimClock};
use segnet_logging::{EventLogConfig, LogConfig};
use segnet_relay::RelayConfig;
use segnet_transport::{ListenerConfig, RetryConfig};

/// Segmentation probes sent past the local gate
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Chance of a probe per interval; 0 disables probing
    pub probability: f64,
    pub interval: Duration,
    /// How long to wait for a `ProbeAck`
    pub timeout: Duration,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probability: 0.0,
            interval: Duration::from_secs(4),
            timeout: Duration::from_secs(3),
            seed: None,
        }
    }
}

impl ProbeConfig {
    pub fn is_enabled(&self) -> bool {
        self.probability > 0.0
    }

    /// Set the probe probability, clamped to `0.0..=1.0`
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Configuration for a ZoneAgent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identity input; must name a zone of the schedule
    pub zone: Option<String>,
    pub schedule_path: PathBuf,
    /// Ingestion feed, read by the head zone only
    pub feed_dir: PathBuf,
    /// Shared simulation origin (Unix seconds); process start when absent
    pub epoch: Option<f64>,
    /// Real length of one simulated second
    pub second: Duration,
    pub listener: ListenerConfig,
    pub retry: RetryConfig,
    pub relay: RelayConfig,
    pub probe: ProbeConfig,
    /// How long DRAINING waits for tasks to finish on their own
    pub drain_grace: Duration,
    /// Event broadcast channel capacity
    pub event_channel_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            zone: None,
            schedule_path: PathBuf::from("schedule.json"),
            feed_dir: PathBuf::from("/app/data_to_send"),
            epoch: None,
            second: Duration::from_secs(1),
            listener: ListenerConfig::default(),
            relay: RelayConfig::default().with_exhausted_pause(retry.max_backoff),
            retry,
            probe: ProbeConfig::default(),
            drain_grace: Duration::from_secs(5),
            event_channel_capacity: 1024,
        }
    }
}

impl AgentConfig {
    /// Loopback binding and short timeouts
    pub fn testing(zone: impl Into<String>) -> Self {
        let retry = RetryConfig::testing();
        Self {
            zone: Some(zone.into()),
            listener: ListenerConfig::testing(),
            relay: RelayConfig::default().with_exhausted_pause(retry.max_backoff),
            retry,
            drain_grace: Duration::from_secs(2),
            ..Default::default()
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_schedule_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schedule_path = path.into();
        self
    }

    pub fn with_feed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.feed_dir = dir.into();
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.listener = self.listener.with_bind_host(host);
        self
    }

    pub fn with_epoch(mut self, epoch_unix_secs: f64) -> Self {
        self.epoch = Some(epoch_unix_secs);
        self
    }

    pub fn with_second(mut self, second: Duration) -> Self {
        self.second = second;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.relay = self.relay.with_buffer_capacity(capacity);
        self
    }

    /// Set the retry policy; the pause after an exhausted round follows
    /// its maximum backoff
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.relay = self.relay.with_exhausted_pause(retry.max_backoff);
        self.retry = retry;
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Simulation clock from the epoch and rate settings
    pub fn clock(&self) -> Arc<dyn Clock> {
        match self.epoch {
            Some(epoch) => Arc::new(SimClock::from_epoch(epoch, self.second)),
            None => Arc::new(SimClock::with_second(self.second)),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "segnet-agent", version, about = "Zone agent of a time-gated SCADA chain")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run this process as one zone of the chain
    Run(RunArgs),
    /// Check a schedule and print its chain
    Validate {
        #[arg(long, env = "SEGNET_SCHEDULE", default_value = "schedule.json")]
        schedule: PathBuf,
    },
    /// Summarize zone event logs
    Monitor(MonitorArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Name of this zone in the schedule
    #[arg(long, env = "ZONE_NAME")]
    pub zone: Option<String>,

    #[arg(long, env = "SEGNET_SCHEDULE", default_value = "schedule.json")]
    pub schedule: PathBuf,

    /// Record files ingested by the head zone
    #[arg(long, env = "SEGNET_FEED_DIR", default_value = "/app/data_to_send")]
    pub feed_dir: PathBuf,

    #[arg(long, env = "SEGNET_BIND_HOST", default_value = "0.0.0.0")]
    pub bind_host: String,

    /// Shared simulation origin, Unix seconds
    #[arg(long, env = "SEGNET_EPOCH")]
    pub epoch: Option<f64>,

    /// Real milliseconds per simulated second
    #[arg(long, env = "SEGNET_SECOND_MS", default_value_t = 1000)]
    pub second_ms: u64,

    /// Per-link buffer capacity
    #[arg(long, env = "SEGNET_BUFFER", default_value_t = 64)]
    pub buffer: usize,

    /// Connection attempts per retry round
    #[arg(long, env = "SEGNET_RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    #[arg(long, env = "SEGNET_PROBE_PROBABILITY", default_value_t = 0.0, value_parser = parse_probability)]
    pub probe_probability: f64,

    #[arg(long, env = "SEGNET_PROBE_INTERVAL_MS", default_value_t = 4000)]
    pub probe_interval_ms: u64,

    #[command(flatten)]
    pub log: LogArgs,
}

impl RunArgs {
    pub fn to_config(&self) -> AgentConfig {
        let mut config = AgentConfig::default()
            .with_schedule_path(&self.schedule)
            .with_feed_dir(&self.feed_dir)
            .with_bind_host(&self.bind_host)
            .with_second(Duration::from_millis(self.second_ms))
            .with_buffer_capacity(self.buffer)
            .with_retry(RetryConfig::default().with_max_attempts(self.retry_attempts))
            .with_probe(
                ProbeConfig::default()
                    .with_probability(self.probe_probability)
                    .with_interval(Duration::from_millis(self.probe_interval_ms)),
            );
        config.zone.clone_from(&self.zone);
        config.epoch = self.epoch;
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Default log level; RUST_LOG overrides it
    #[arg(long, env = "SEGNET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Human-readable console output
    #[arg(long)]
    pub pretty: bool,

    /// Zone event log [default: <log-dir>/<zone>.events.jsonl]
    #[arg(long, env = "SEGNET_EVENT_LOG")]
    pub event_log: Option<PathBuf>,

    #[arg(long, env = "SEGNET_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,
}

impl LogArgs {
    /// Logging setup for `zone`; without a zone there is no event log
    pub fn to_log_config(&self, zone: Option<&str>) -> LogConfig {
        let mut config = if self.pretty {
            LogConfig::development()
        } else {
            LogConfig::default()
        };
        config.default_level.clone_from(&self.log_level);
        config.event_log = match (&self.event_log, zone) {
            (Some(path), _) => Some(EventLogConfig::new(path)),
            (None, Some(zone)) => Some(EventLogConfig::for_zone(&self.log_dir, zone)),
            (None, None) => None,
        };
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct MonitorArgs {
    /// Event log files to read
    #[arg(long = "log", required = true, num_args = 1..)]
    pub logs: Vec<PathBuf>,

    /// Keep polling for appended lines
    #[arg(long)]
    pub follow: bool,

    #[arg(long, default_value_t = 2000)]
    pub interval_ms: u64,
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in 0.0..=1.0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.relay.buffer_capacity, 64);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.relay.exhausted_pause, config.retry.max_backoff);
        assert!(!config.probe.is_enabled());
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "segnet-agent",
            "run",
            "--zone",
            "forecast_zone",
            "--schedule",
            "/etc/segnet/schedule.json",
            "--second-ms",
            "40",
            "--buffer",
            "8",
            "--retry-attempts",
            "2",
            "--probe-probability",
            "0.3",
            "--epoch",
            "1700000000.5",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = args.to_config();
        assert_eq!(config.zone.as_deref(), Some("forecast_zone"));
        assert_eq!(config.schedule_path, PathBuf::from("/etc/segnet/schedule.json"));
        assert_eq!(config.second, Duration::from_millis(40));
        assert_eq!(config.relay.buffer_capacity, 8);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.probe.probability, 0.3);
        assert_eq!(config.epoch, Some(1_700_000_000.5));

        let log = args.log.to_log_config(config.zone.as_deref());
        assert_eq!(
            log.event_log.unwrap().path,
            PathBuf::from("./logs/forecast_zone.events.jsonl")
        );
    }

    #[test]
    fn test_probability_out_of_range() {
        let err = Cli::try_parse_from(["segnet-agent", "run", "--probe-probability", "1.5"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_monitor_needs_a_log() {
        assert!(Cli::try_parse_from(["segnet-agent", "monitor"]).is_err());
        let cli = Cli::try_parse_from(["segnet-agent", "monitor", "--log", "a.jsonl", "b.jsonl"]).unwrap();
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        assert_eq!(args.logs.len(), 2);
    }
}
