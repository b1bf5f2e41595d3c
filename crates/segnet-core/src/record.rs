//! Opaque payload units carried along the chain

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One opaque, ordered payload unit
///
/// `seq` is the position at which the unit was read from its ingress. The
/// payload is never interpreted and is forwarded byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    pub payload: Bytes,
}

impl Record {
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
