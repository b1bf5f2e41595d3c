//! Relay pipeline for one downstream link
//!
//! A single task reads the ingress and writes the link, so units leave in
//! the order they were read. Every unit goes through the bounded buffer:
//!
//! - CLOSED: units are buffered; a full buffer drops the arriving unit
//!   (`Backpressure`)
//! - OPEN: the buffer is forwarded front to back. A unit is popped only
//!   after the downstream zone acked it.
//! - EXPIRED: buffered units and every later arrival are dropped
//!   (`Expired`); a feed's unread files are counted without reading them
//!
//! A unit larger than one link frame is dropped on arrival (`Oversize`).
//! A live link that fails is reconnected after the same backoff a failed
//! connect attempt gets.
//!
//! Forwarding depends only on this link's window, never on when a unit
//! arrived from upstream.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use segnet_core::{DropCause, EventBus, EventKind, Record, Rule, WindowGate, WindowState};
use segnet_transport::{
    Connector, FramingError, Link, MAX_RECORD_PAYLOAD, TransportError, fits_frame,
};

use crate::buffer::LinkBuffer;
use crate::error::RelayResult;
use crate::ingress::Ingress;
use crate::stats::{LinkReport, RelayStats};

/// Relay tuning
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub buffer_capacity: usize,
    /// Pause after a retry round ran out inside an open window
    pub exhausted_pause: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            exhausted_pause: Duration::from_secs(4),
        }
    }
}

impl RelayConfig {
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_exhausted_pause(mut self, pause: Duration) -> Self {
        self.exhausted_pause = pause;
        self
    }
}

/// Moves records from an ingress to the zone's downstream link
pub struct RelayPipeline<I> {
    ingress: I,
    connector: Connector,
    gate: WindowGate,
    buffer: LinkBuffer,
    events: EventBus,
    stats: Arc<RelayStats>,
    config: RelayConfig,
    link: Option<Link>,
    ingress_done: bool,
    /// Consecutive failed sends on live links, reset by an ack
    send_failures: u32,
    /// False once the gate controller is gone and no transition can come
    gate_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Finished,
}

impl<I: Ingress> RelayPipeline<I> {
    pub fn new(ingress: I, connector: Connector, events: EventBus, config: RelayConfig) -> Self {
        let gate = connector.gate().clone();
        Self {
            ingress,
            connector,
            gate,
            buffer: LinkBuffer::new(config.buffer_capacity),
            events,
            stats: Arc::new(RelayStats::default()),
            config,
            link: None,
            ingress_done: false,
            send_failures: 0,
            gate_live: true,
        }
    }

    /// Live counters; stay valid after the relay finished
    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    pub fn link_name(&self) -> String {
        self.connector.link_name()
    }

    /// Relay until the link expired and the ingress ended, the ingress ended
    /// with nothing left to forward, or `cancel` fired.
    #[instrument(skip_all, fields(link = %self.connector.link_name(), ingress = %self.ingress.describe()))]
    pub async fn run(mut self, cancel: CancellationToken) -> LinkReport {
        loop {
            if cancel.is_cancelled() {
                self.shutdown().await;
                break;
            }

            let step = match self.gate.state() {
                WindowState::Closed => self.while_closed(&cancel).await,
                WindowState::Open => self.while_open(&cancel).await,
                WindowState::Expired => self.after_expiry(&cancel).await,
            };
            if step == Step::Finished {
                break;
            }
        }

        if let Some(link) = self.link.take() {
            link.close().await;
        }
        let report = self.stats.snapshot(self.link_name());
        info!(
            forwarded = report.forwarded,
            dropped = report.dropped(),
            "relay finished"
        );
        report
    }

    fn nothing_left(&self) -> bool {
        self.ingress_done && self.buffer.is_empty()
    }

    async fn while_closed(&mut self, cancel: &CancellationToken) -> Step {
        if self.nothing_left() {
            debug!("ingress ended with nothing buffered");
            return Step::Finished;
        }
        if !self.gate_live {
            // this window will never open
            self.drop_buffered(DropCause::Shutdown);
            return Step::Finished;
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            changed = self.gate.changed() => self.gate_live = changed.is_some(),
            next = self.ingress.next(), if !self.ingress_done => self.admit(next),
        }
        Step::Continue
    }

    async fn while_open(&mut self, cancel: &CancellationToken) -> Step {
        if self.buffer.is_empty() {
            if self.ingress_done {
                debug!("ingress ended and buffer drained");
                return Step::Finished;
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                changed = self.gate.changed(), if self.gate_live => self.gate_live = changed.is_some(),
                next = self.ingress.next() => self.admit(next),
            }
            return Step::Continue;
        }

        if self.link.is_none() {
            match self.connector.connect(cancel).await {
                Ok(link) => {
                    self.stats.record_connect();
                    self.link = Some(link);
                }
                // window moved on or shutdown; the main loop sorts it out
                Err(TransportError::LinkUnavailable { .. } | TransportError::Cancelled) => {
                    return Step::Continue;
                }
                Err(e) => {
                    self.stats.record_failed_round();
                    warn!(error = %e, "connect round failed, pausing");
                    self.pause(self.config.exhausted_pause, cancel).await;
                    return Step::Continue;
                }
            }
        }

        self.forward_front(cancel).await;
        self.admit_ready().await;
        Step::Continue
    }

    async fn forward_front(&mut self, cancel: &CancellationToken) {
        let (Some(link), Some(record)) = (self.link.as_mut(), self.buffer.front()) else {
            return;
        };
        let rule: Rule = link.rule().clone();
        let sent = link.send(record).await;

        match sent {
            Ok(()) => {
                self.send_failures = 0;
                if let Some(record) = self.buffer.pop_front() {
                    let bytes = record.len();
                    self.stats.record_forwarded(bytes);
                    self.events.emit_rule(
                        &rule,
                        EventKind::Forwarded {
                            seq: record.seq,
                            bytes,
                        },
                    );
                }
            }
            Err(TransportError::Framing(
                e @ (FramingError::MessageTooLarge { .. } | FramingError::Serialization(_)),
            )) => {
                // sending it again can only fail the same way
                warn!(error = %e, "unit cannot be framed, dropping");
                if let Some(record) = self.buffer.pop_front() {
                    self.drop_record(record, DropCause::Oversize);
                }
            }
            Err(e) => {
                // the unit stays at the front and is sent again on a new link
                self.link = None;
                self.send_failures = self.send_failures.saturating_add(1);
                let delay = self.connector.retry().backoff_for(self.send_failures);
                debug!(
                    error = %e,
                    failures = self.send_failures,
                    delay_ms = delay.as_millis() as u64,
                    "send failed, reconnecting"
                );
                self.pause(delay, cancel).await;
            }
        }
    }

    /// Drop everything buffered, then every later arrival, as expired
    async fn after_expiry(&mut self, cancel: &CancellationToken) -> Step {
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        self.drop_buffered(DropCause::Expired);
        self.drop_unread(DropCause::Expired);

        if self.ingress_done {
            return Step::Finished;
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            next = self.ingress.next() => self.admit(next),
        }
        Step::Continue
    }

    /// Wait `delay`, still admitting arrivals; a window change ends it early
    async fn pause(&mut self, delay: Duration, cancel: &CancellationToken) {
        let pause = tokio::time::sleep(delay);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = &mut pause => break,
                _ = cancel.cancelled() => break,
                changed = self.gate.changed(), if self.gate_live => {
                    self.gate_live = changed.is_some();
                    break;
                }
                next = self.ingress.next(), if !self.ingress_done => self.admit(next),
            }
        }
    }

    /// Take whatever the ingress has ready without waiting
    async fn admit_ready(&mut self) {
        while !self.ingress_done {
            tokio::select! {
                biased;
                next = self.ingress.next() => self.admit(next),
                _ = std::future::ready(()) => break,
            }
        }
    }

    fn admit(&mut self, next: RelayResult<Option<Record>>) {
        let record = match next {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(buffered = self.buffer.len(), "ingress ended");
                self.ingress_done = true;
                return;
            }
            Err(e) => {
                warn!(error = %e, "ingress error, skipping unit");
                return;
            }
        };
        self.stats.record_read();

        if self.gate.state() == WindowState::Expired {
            self.drop_record(record, DropCause::Expired);
            return;
        }
        if !fits_frame(&record) {
            warn!(
                seq = record.seq,
                bytes = record.len(),
                max = MAX_RECORD_PAYLOAD,
                "unit exceeds the link frame limit"
            );
            self.drop_record(record, DropCause::Oversize);
            return;
        }
        if let Err(record) = self.buffer.push(record) {
            self.drop_record(record, DropCause::Backpressure);
        }
    }

    fn drop_buffered(&mut self, cause: DropCause) {
        let dropped: Vec<Record> = self.buffer.drain().collect();
        for record in dropped {
            self.drop_record(record, cause);
        }
    }

    /// Feed files that will never be read now
    fn drop_unread(&mut self, cause: DropCause) {
        let skipped = self.ingress.skip_remaining();
        if !skipped.is_empty() {
            debug!(count = skipped.len(), "dropping unread units");
        }
        for seq in skipped {
            self.drop_unit(seq, cause);
        }
    }

    fn drop_record(&self, record: Record, cause: DropCause) {
        self.drop_unit(record.seq, cause);
    }

    fn drop_unit(&self, seq: u64, cause: DropCause) {
        self.stats.record_dropped(cause);
        let kind = EventKind::Dropped { seq, cause };
        match self.gate.rules().first() {
            Some(rule) => self.events.emit_rule_port(rule, None, kind),
            None => self.events.emit(kind),
        };
    }

    async fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        let cause = if self.gate.state() == WindowState::Expired {
            DropCause::Expired
        } else {
            DropCause::Shutdown
        };
        self.drop_buffered(cause);
        self.drop_unread(cause);
    }
}

impl<I> std::fmt::Debug for RelayPipeline<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPipeline")
            .field("link", &self.connector.link_name())
            .field("buffered", &self.buffer.len())
            .field("ingress_done", &self.ingress_done)
            .finish()
    }
}
