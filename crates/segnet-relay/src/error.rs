//! Relay error types

use std::path::PathBuf;

use thiserror::Error;

use segnet_transport::TransportError;

/// Errors raised while relaying one link
///
/// Backpressure is not an error here: an overflowing unit is dropped and
/// counted with [`DropCause::Backpressure`](segnet_core::DropCause).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Cannot read feed {}: {reason}", path.display())]
    Feed { path: PathBuf, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
