//! Error types for the zone agent

use segnet_core::{IdentityError, SchemaError};
use segnet_transport::TransportError;
use thiserror::Error;

/// Errors that stop a zone agent from starting
///
/// Everything that goes wrong on a running link is contained to that link's
/// task and only ever reported as an event.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The schedule is malformed or inconsistent
    #[error("Schedule error: {0}")]
    Schema(#[from] SchemaError),

    /// This process is not a zone of the schedule
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// A listener could not be bound
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl AgentError {
    /// Process exit code for a failed start
    pub fn exit_code(&self) -> u8 {
        match self {
            AgentError::Schema(_) => 2,
            AgentError::Identity(_) => 3,
            AgentError::Transport(_) => 4,
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
