//! Error types for schedule loading and zone identity

use std::path::PathBuf;

use thiserror::Error;

use crate::rule::RuleId;

/// A malformed or inconsistent schedule.
///
/// Always fatal at startup: a schedule that fails validation never yields a
/// partially usable [`Schedule`](crate::Schedule).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Cannot read schedule {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Malformed schedule: {0}")]
    Malformed(String),

    #[error("Zone '{zone}': {reason}")]
    InvalidZone { zone: String, reason: String },

    #[error("Rule {rule}: references unknown zone '{zone}'")]
    UnknownZone { rule: RuleId, zone: String },

    #[error("Rule {rule}: '{from}' -> '{to}' are not adjacent in the chain")]
    NotAdjacent { rule: RuleId, from: String, to: String },

    #[error("Rule {rule}: window [{start_sec}, {end_sec}) must satisfy 0 <= start_sec < end_sec")]
    InvalidWindow {
        rule: RuleId,
        start_sec: i64,
        end_sec: i64,
    },

    #[error("Rule {rule}: port {port} is not a valid TCP port")]
    InvalidPort { rule: RuleId, port: i64 },

    #[error("Rule {rule}: port {port} on '{destination}' is already bound by rule {other}")]
    PortConflict {
        rule: RuleId,
        other: RuleId,
        destination: String,
        port: u16,
    },

    #[error("Broken chain: {0}")]
    BrokenChain(String),
}

/// The zone identity of this process could not be resolved.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Zone name is not set (expected ZONE_NAME)")]
    Missing,

    #[error("Zone '{0}' does not appear in the schedule")]
    UnknownZone(String),
}

/// Result type for schedule operations
pub type SchemaResult<T> = Result<T, SchemaError>;
