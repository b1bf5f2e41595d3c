//! Relay pipeline for segnet zone agents
//!
//! One [`RelayPipeline`] per downstream link carries records from an
//! [`Ingress`] (the feed directory of the head zone, or what upstream
//! listeners accepted) to the link, honouring the link's window. The tail
//! zone runs a [`TerminalSink`] instead.

pub mod buffer;
pub mod error;
pub mod ingress;
pub mod pipeline;
pub mod sink;
pub mod stats;

pub use buffer::LinkBuffer;
pub use error::{RelayError, RelayResult};
pub use ingress::{ChannelIngress, FeedSource, Ingress};
pub use pipeline::{RelayConfig, RelayPipeline};
pub use sink::{SinkHandle, SinkReport, TerminalSink};
pub use stats::{LinkReport, RelayStats};
