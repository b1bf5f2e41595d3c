//! Per-rule listener (server capability)
//!
//! One [`ZoneListener`] per rule where the zone is destination. The socket
//! is bound at startup and then follows the rule's gate:
//!
//! - CLOSED: connections are accepted and closed at once (`refuse`)
//! - OPEN: a `Hello` naming this rule's link is answered with `Welcome`
//!   and the session's records are handed to the zone's relay
//! - EXPIRED: the socket is dropped and live sessions are told to stop

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use segnet_core::{EventBus, EventKind, Record, RefuseReason, Rule, RuleId, WindowGate, WindowState};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{WireMessage, read_message, write_message};

/// Listener tuning
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address the listener binds on; the port comes from the rule
    pub bind_host: String,
    /// How long a new connection may take to send its first message
    pub handshake_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            handshake_timeout: Duration::from_secs(3),
        }
    }
}

impl ListenerConfig {
    /// Loopback binding with short timeouts
    pub fn testing() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            handshake_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }
}

#[derive(Debug, Default)]
struct ListenerStats {
    accepted: AtomicU64,
    refused: AtomicU64,
    records: AtomicU64,
    probes: AtomicU64,
}

/// Final counts of one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ListenerReport {
    pub rule: Option<RuleId>,
    pub accepted: u64,
    pub refused: u64,
    pub records: u64,
    pub probes: u64,
}

/// Window-gated listener for one rule
#[derive(Debug)]
pub struct ZoneListener {
    rule: Rule,
    listener: TcpListener,
    gate: WindowGate,
    inbound: mpsc::Sender<Record>,
    events: EventBus,
    config: ListenerConfig,
}

impl ZoneListener {
    /// Bind `config.bind_host:rule.port`
    pub async fn bind(
        rule: Rule,
        gate: WindowGate,
        inbound: mpsc::Sender<Record>,
        events: EventBus,
        config: ListenerConfig,
    ) -> TransportResult<Self> {
        let addr = format!("{}:{}", config.bind_host, rule.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let local = listener.local_addr()?;
        events.emit_rule(&rule, EventKind::Listening { addr: local });

        Ok(Self {
            rule,
            listener,
            gate,
            inbound,
            events,
            config,
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Accept until the rule expires or `cancel` fires, then wait for live
    /// sessions to finish their current message.
    #[instrument(skip_all, fields(rule = %self.rule.id, port = self.rule.port))]
    pub async fn run(self, cancel: CancellationToken) -> ListenerReport {
        let Self {
            rule,
            listener,
            gate,
            inbound,
            events,
            config,
        } = self;
        let rule = Arc::new(rule);
        let stats = Arc::new(ListenerStats::default());
        let sessions_cancel = cancel.child_token();
        let mut sessions = JoinSet::new();
        let mut expiry = gate.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = expiry.expired() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            debug!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    match gate.state() {
                        WindowState::Open => {
                            let session = Session {
                                rule: rule.clone(),
                                peer,
                                gate: gate.clone(),
                                inbound: inbound.clone(),
                                events: events.clone(),
                                stats: stats.clone(),
                                handshake_timeout: config.handshake_timeout,
                            };
                            sessions.spawn(session.run(stream, sessions_cancel.clone()));
                        }
                        WindowState::Closed => {
                            drop(stream);
                            stats.refused.fetch_add(1, Ordering::Relaxed);
                            events.emit_rule(
                                &rule,
                                EventKind::Refused {
                                    peer: Some(peer),
                                    reason: RefuseReason::WindowClosed,
                                },
                            );
                        }
                        WindowState::Expired => break,
                    }
                }
                // reap finished sessions as we go
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        drop(listener);
        events.emit_rule(&rule, EventKind::ListenerStopped);

        sessions_cancel.cancel();
        while sessions.join_next().await.is_some() {}

        ListenerReport {
            rule: Some(rule.id),
            accepted: stats.accepted.load(Ordering::Relaxed),
            refused: stats.refused.load(Ordering::Relaxed),
            records: stats.records.load(Ordering::Relaxed),
            probes: stats.probes.load(Ordering::Relaxed),
        }
    }
}

/// One accepted connection
struct Session {
    rule: Arc<Rule>,
    peer: SocketAddr,
    gate: WindowGate,
    inbound: mpsc::Sender<Record>,
    events: EventBus,
    stats: Arc<ListenerStats>,
    handshake_timeout: Duration,
}

impl Session {
    async fn run(self, mut stream: TcpStream, cancel: CancellationToken) {
        let first = tokio::time::timeout(self.handshake_timeout, read_message(&mut stream)).await;
        match first {
            Ok(Ok(Some(WireMessage::Hello {
                source,
                destination,
                port,
            }))) => {
                if !self.rule.connects(&source, &destination) || port != self.rule.port {
                    debug!(%source, %destination, port, "hello does not match rule");
                    self.refuse(RefuseReason::WrongPeer);
                    return;
                }
                self.data_session(stream, cancel).await;
            }
            Ok(Ok(Some(WireMessage::Probe { id }))) => {
                self.stats.probes.fetch_add(1, Ordering::Relaxed);
                if self.gate.is_open() {
                    trace!(id, peer = %self.peer, "answering probe");
                    let _ = write_message(&mut stream, &WireMessage::ProbeAck { id }).await;
                }
            }
            Ok(Ok(Some(other))) => {
                debug!(kind = other.kind(), "unexpected first message");
                self.refuse(RefuseReason::Handshake);
            }
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => self.refuse(RefuseReason::Handshake),
        }
    }

    fn refuse(&self, reason: RefuseReason) {
        self.stats.refused.fetch_add(1, Ordering::Relaxed);
        self.events.emit_rule(
            &self.rule,
            EventKind::Refused {
                peer: Some(self.peer),
                reason,
            },
        );
    }

    async fn data_session(&self, mut stream: TcpStream, cancel: CancellationToken) {
        if write_message(&mut stream, &WireMessage::Welcome).await.is_err() {
            return;
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        self.events.emit_rule(&self.rule, EventKind::Accepted { peer: self.peer });

        let mut expiry = self.gate.clone();
        loop {
            // a record already read is always stored and acked before we
            // look at cancellation again
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = expiry.expired() => break,
                msg = read_message(&mut stream) => msg,
            };

            match msg {
                Ok(Some(WireMessage::Record { seq, payload })) => {
                    let bytes = payload.len();
                    if self.inbound.send(Record { seq, payload }).await.is_err() {
                        debug!(seq, "relay is gone, closing session");
                        break;
                    }
                    self.stats.records.fetch_add(1, Ordering::Relaxed);
                    self.events
                        .emit_rule(&self.rule, EventKind::Received { seq, bytes });
                    if write_message(&mut stream, &WireMessage::Ack { seq }).await.is_err() {
                        break;
                    }
                }
                Ok(Some(WireMessage::Probe { id })) => {
                    self.stats.probes.fetch_add(1, Ordering::Relaxed);
                    let _ = write_message(&mut stream, &WireMessage::ProbeAck { id }).await;
                }
                Ok(Some(WireMessage::Done)) | Ok(None) => break,
                Ok(Some(other)) => {
                    debug!(kind = other.kind(), "ignoring message in data session");
                }
                Err(e) => {
                    debug!(error = %e, peer = %self.peer, "session read failed");
                    break;
                }
            }
        }
        trace!(peer = %self.peer, "session closed");
    }
}
