//! Terminal sink of the last zone
//!
//! Accepts every delivered record and confirms it with a `deliver` event.
//! Nothing is forwarded further, and only counts are kept unless the sink
//! was built with [`TerminalSink::capturing`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use segnet_core::{EventBus, EventKind, Record, Rule};

use crate::ingress::Ingress;

#[derive(Debug, Default)]
struct Delivered {
    count: AtomicU64,
    bytes: AtomicU64,
    /// Present only for a capturing sink
    records: Option<Mutex<Vec<Record>>>,
}

/// Read side of a sink, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct SinkHandle {
    inner: Arc<Delivered>,
}

impl SinkHandle {
    pub fn delivered(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Records delivered so far, in delivery order; empty unless capturing
    pub fn records(&self) -> Vec<Record> {
        self.inner
            .records
            .as_ref()
            .map(|records| records.lock().clone())
            .unwrap_or_default()
    }

    pub fn report(&self) -> SinkReport {
        SinkReport {
            delivered: self.delivered(),
            delivered_bytes: self.inner.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Final counts of the terminal sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SinkReport {
    pub delivered: u64,
    pub delivered_bytes: u64,
}

/// Data sink of the chain's tail zone
#[derive(Debug)]
pub struct TerminalSink {
    events: EventBus,
    rule: Option<Rule>,
    handle: SinkHandle,
}

impl TerminalSink {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            rule: None,
            handle: SinkHandle::default(),
        }
    }

    /// A sink that also keeps every delivered record
    pub fn capturing(events: EventBus) -> Self {
        let delivered = Delivered {
            records: Some(Mutex::new(Vec::new())),
            ..Delivered::default()
        };
        Self {
            events,
            rule: None,
            handle: SinkHandle {
                inner: Arc::new(delivered),
            },
        }
    }

    /// Attribute deliveries to the link of `rule`
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Accept one record
    pub fn deliver(&self, record: Record) {
        let bytes = record.len();
        let kind = EventKind::Delivered {
            seq: record.seq,
            bytes,
        };
        match &self.rule {
            Some(rule) => self.events.emit_rule(rule, kind),
            None => self.events.emit(kind),
        };

        let inner = &self.handle.inner;
        inner.count.fetch_add(1, Ordering::Relaxed);
        inner.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        if let Some(records) = &inner.records {
            records.lock().push(record);
        }
    }

    /// Deliver everything `ingress` yields until it ends or `cancel` fires
    #[instrument(skip_all, fields(ingress = %ingress.describe()))]
    pub async fn run<I: Ingress>(self, mut ingress: I, cancel: CancellationToken) -> SinkReport {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = ingress.next() => next,
            };
            match next {
                Ok(Some(record)) => self.deliver(record),
                Ok(None) => break,
                Err(e) => warn!(error = %e, "ingress error"),
            }
        }
        self.handle.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::ChannelIngress;
    use segnet_core::{ManualClock, ZoneName};

    #[tokio::test]
    async fn test_sink_keeps_delivery_order() {
        let events = EventBus::new(ZoneName::new("hmi_zone"), Arc::new(ManualClock::new()), 16);
        let mut rx = events.subscribe();
        let sink = TerminalSink::capturing(events);
        let handle = sink.handle();

        let (tx, ingress) = ChannelIngress::channel("control_zone->hmi_zone", 8);
        for seq in [4u64, 2, 9] {
            tx.send(Record::new(seq, vec![seq as u8; 3])).await.unwrap();
        }
        drop(tx);

        let report = sink.run(ingress, CancellationToken::new()).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.delivered_bytes, 9);

        let seqs: Vec<u64> = handle.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, [4, 2, 9]);
        assert_eq!(rx.try_recv().unwrap().kind.name(), "deliver");
    }

    #[tokio::test]
    async fn test_default_sink_keeps_only_counts() {
        let events = EventBus::new(ZoneName::new("hmi_zone"), Arc::new(ManualClock::new()), 16);
        let sink = TerminalSink::new(events);
        let handle = sink.handle();

        let (tx, ingress) = ChannelIngress::channel("control_zone->hmi_zone", 8);
        for seq in 0..4u64 {
            tx.send(Record::new(seq, vec![0u8; 256])).await.unwrap();
        }
        drop(tx);

        let report = sink.run(ingress, CancellationToken::new()).await;
        assert_eq!(report.delivered, 4);
        assert_eq!(report.delivered_bytes, 1024);
        assert!(handle.inner.records.is_none());
        assert!(handle.records().is_empty());
    }
}
