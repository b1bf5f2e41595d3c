//! Zone agent for segnet
//!
//! One process per zone. The agent loads the shared schedule, resolves its
//! own zone from `ZONE_NAME`, and runs the listeners, relay and probes its
//! role calls for until every rule it takes part in has expired.
//!
//! # Example
//!
//! ```ignore
//! use segnet_agent::{AgentConfig, ZoneAgent};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = AgentConfig::default()
//!     .with_zone("forecast_zone")
//!     .with_schedule_path("schedule.json");
//! let report = ZoneAgent::from_config(config)?
//!     .run(CancellationToken::new())
//!     .await?;
//! println!("forwarded {}", report.passed_on());
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod probe;
pub mod shutdown;

pub use config::{AgentConfig, Cli, Command, LogArgs, MonitorArgs, ProbeConfig, RunArgs};
pub use error::{AgentError, AgentResult};
pub use monitor::{LinkSummary, LogEntry, LogTail, Summary, monitor};
pub use orchestrator::{AgentReport, ZoneAgent};
pub use probe::{ProbeReport, Prober};
pub use shutdown::create_shutdown_token;
