//! Core types for segnet zone agents
//!
//! A segnet deployment is a linear chain of zones. Each adjacent pair is
//! joined by one or more [`Rule`]s, and a rule's link may carry traffic only
//! inside its time [`Window`]. This crate holds the pure parts:
//!
//! - [`Schedule`]: loading and validating the zone/rule configuration
//! - [`window`]: the CLOSED/OPEN/EXPIRED state of a rule at an elapsed time
//! - [`Clock`]: the shared simulation origin
//! - [`gate`]: a watch channel publishing window transitions to tasks
//! - [`ZoneEvent`]: the event vocabulary written to the event log

pub mod clock;
pub mod error;
pub mod event;
pub mod gate;
pub mod record;
pub mod rule;
pub mod schedule;
pub mod window;
pub mod zone;

pub use clock::{Clock, ManualClock, SimClock};
pub use error::{IdentityError, SchemaError, SchemaResult};
pub use event::{
    AgentPhase, DropCause, EVENT_TARGET, EventBus, EventKind, ProbeOutcome, RefuseReason, ZoneEvent,
};
pub use gate::{GateController, WindowGate, gate};
pub use record::Record;
pub use rule::{Rule, RuleId, Window};
pub use schedule::Schedule;
pub use window::{LinkState, WindowState};
pub use zone::{Capabilities, Capability, Role, Zone, ZoneName};
