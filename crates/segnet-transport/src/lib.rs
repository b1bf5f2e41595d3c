//! Transport endpoints for segnet zone agents
//!
//! - [`ZoneListener`]: accepts the upstream link of one rule (server)
//! - [`Connector`]: originates the downstream link (client)
//! - [`EndpointPlan`]: which of the two a zone runs, from its role
//!
//! Links are plain TCP carrying length-prefixed [`WireMessage`] frames.

pub mod connector;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod protocol;

pub use connector::{Connector, Link, RetryConfig, send_probe};
pub use endpoint::{DownstreamPlan, EndpointPlan};
pub use error::{TransportError, TransportResult};
pub use listener::{ListenerConfig, ListenerReport, ZoneListener};
pub use protocol::{FramingError, MAX_MESSAGE_SIZE, MAX_RECORD_PAYLOAD, WireMessage, fits_frame};
