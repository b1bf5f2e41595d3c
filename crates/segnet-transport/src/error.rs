//! Transport error types

pub use crate::protocol::FramingError;

use segnet_core::WindowState;
use thiserror::Error;

/// Errors raised by listeners, connectors and links
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection attempted outside the link's window. Never retried.
    #[error("Link {link} unavailable: window is {state}")]
    LinkUnavailable { link: String, state: WindowState },

    /// Remote unreachable while the window is open. Retried with backoff.
    #[error("Transient network error reaching {addr}: {reason}")]
    Transient { addr: String, reason: String },

    #[error("Link {link}: gave up after {attempts} attempts")]
    RetriesExhausted { link: String, attempts: u32 },

    #[error("No ack for record #{seq} within {timeout_ms} ms")]
    AckTimeout { seq: u64, timeout_ms: u64 },

    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Protocol framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether a retry inside an open window may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Transient { .. }
                | TransportError::Io(_)
                | TransportError::StreamClosed
                | TransportError::AckTimeout { .. }
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
