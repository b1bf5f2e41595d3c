//! Relay counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use segnet_core::DropCause;

/// Live counters of one relay, shared with whoever wants a snapshot
#[derive(Debug, Default)]
pub struct RelayStats {
    read: AtomicU64,
    forwarded: AtomicU64,
    forwarded_bytes: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_expired: AtomicU64,
    dropped_shutdown: AtomicU64,
    dropped_oversize: AtomicU64,
    connects: AtomicU64,
    failed_rounds: AtomicU64,
}

impl RelayStats {
    pub fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self, bytes: usize) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.forwarded_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, cause: DropCause) {
        let counter = match cause {
            DropCause::Backpressure => &self.dropped_backpressure,
            DropCause::Expired => &self.dropped_expired,
            DropCause::Shutdown => &self.dropped_shutdown,
            DropCause::Oversize => &self.dropped_oversize,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_round(&self) {
        self.failed_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, link: impl Into<String>) -> LinkReport {
        LinkReport {
            link: link.into(),
            read: self.read.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forwarded_bytes: self.forwarded_bytes.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
            dropped_oversize: self.dropped_oversize.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            failed_rounds: self.failed_rounds.load(Ordering::Relaxed),
        }
    }
}

/// Final counts of one link, as reported at DRAINING
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LinkReport {
    pub link: String,
    pub read: u64,
    pub forwarded: u64,
    pub forwarded_bytes: u64,
    pub dropped_backpressure: u64,
    pub dropped_expired: u64,
    pub dropped_shutdown: u64,
    /// Units too large for one link frame
    pub dropped_oversize: u64,
    pub connects: u64,
    /// Retry rounds that ran out of attempts inside an open window
    pub failed_rounds: u64,
}

impl LinkReport {
    pub fn dropped(&self) -> u64 {
        self.dropped_backpressure + self.dropped_expired + self.dropped_shutdown + self.dropped_oversize
    }
}
