//! Window-gated connector (client capability)
//!
//! A [`Connector`] originates the zone's downstream link. It only touches
//! the network while the link's gate is OPEN: outside the window every
//! attempt fails fast with [`TransportError::LinkUnavailable`]. Inside the
//! window a transient failure is retried with bounded exponential backoff.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use segnet_core::{EventBus, EventKind, Record, Rule, WindowGate, Zone, ZoneName};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{WireMessage, read_message, write_message};

/// Retry and timeout policy for one link
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per round, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt
    pub base_backoff: Duration,
    /// Upper bound of the backoff delay
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
    /// How long to wait for the ack of one record
    pub ack_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            connect_timeout: Duration::from_secs(3),
            ack_timeout: Duration::from_secs(3),
        }
    }
}

impl RetryConfig {
    /// Short delays for loopback tests
    pub fn testing() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Originates the downstream link of one zone
#[derive(Debug)]
pub struct Connector {
    source: ZoneName,
    target: Zone,
    gate: WindowGate,
    retry: RetryConfig,
    events: EventBus,
}

impl Connector {
    pub fn new(source: ZoneName, target: Zone, gate: WindowGate, retry: RetryConfig, events: EventBus) -> Self {
        Self {
            source,
            target,
            gate,
            retry,
            events,
        }
    }

    pub fn gate(&self) -> &WindowGate {
        &self.gate
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn link_name(&self) -> String {
        format!("{}->{}", self.source, self.target.name)
    }

    /// Address of the downstream listener for `port`
    pub fn target_addr(&self, port: u16) -> String {
        format!("{}:{}", self.target.host, port)
    }

    /// One connection attempt, gated by the current window
    pub async fn try_connect(&self, attempt: u32) -> TransportResult<Link> {
        let link = self.gate.current();
        let rule = link
            .active
            .and_then(|id| self.gate.rules().iter().find(|r| r.id == id));
        let Some(rule) = rule.filter(|_| link.is_open()) else {
            if let Some(first) = self.gate.rules().first() {
                self.events
                    .emit_rule_port(first, None, EventKind::Unavailable(link.state));
            }
            return Err(TransportError::LinkUnavailable {
                link: self.link_name(),
                state: link.state,
            });
        };

        let addr = self.target_addr(rule.port);
        trace!(%addr, attempt, "connecting");
        let stream = match tokio::time::timeout(self.retry.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Transient {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(TransportError::Transient {
                    addr,
                    reason: "connect timed out".to_string(),
                });
            }
        };

        let link = self.handshake(stream, rule, &addr).await?;
        self.events
            .emit_rule(rule, EventKind::Connected { attempt });
        Ok(link)
    }

    async fn handshake(&self, mut stream: TcpStream, rule: &Rule, addr: &str) -> TransportResult<Link> {
        let hello = WireMessage::Hello {
            source: rule.source.to_string(),
            destination: rule.destination.to_string(),
            port: rule.port,
        };
        write_message(&mut stream, &hello).await?;

        let reply = tokio::time::timeout(self.retry.connect_timeout, read_message(&mut stream)).await;
        match reply {
            Ok(Ok(Some(WireMessage::Welcome))) => {}
            Ok(Ok(Some(other))) => {
                return Err(TransportError::UnexpectedMessage {
                    expected: "welcome",
                    got: other.kind(),
                });
            }
            Ok(Ok(None)) | Ok(Err(_)) => {
                return Err(TransportError::Transient {
                    addr: addr.to_string(),
                    reason: "listener closed the connection".to_string(),
                });
            }
            Err(_) => {
                return Err(TransportError::Transient {
                    addr: addr.to_string(),
                    reason: "no welcome from listener".to_string(),
                });
            }
        }

        let peer = stream.peer_addr()?;
        Ok(Link {
            stream,
            rule: rule.clone(),
            peer,
            ack_timeout: self.retry.ack_timeout,
        })
    }

    /// Connect with one bounded retry round.
    ///
    /// Stops at once with `LinkUnavailable` if the window is or becomes
    /// not OPEN; backoff sleeps are cut short by a window change.
    #[instrument(skip_all, fields(link = %self.link_name()))]
    pub async fn connect(&mut self, cancel: &CancellationToken) -> TransportResult<Link> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let error = match self.try_connect(attempt).await {
                Ok(link) => return Ok(link),
                Err(e) if !e.is_transient() => {
                    if !matches!(e, TransportError::LinkUnavailable { .. }) {
                        debug!(error = %e, "connect failed permanently");
                    }
                    return Err(e);
                }
                Err(e) => e,
            };

            if let Some(rule) = self.active_rule() {
                self.events.emit_rule(
                    &rule,
                    EventKind::ConnectFailed {
                        attempt,
                        error: error.to_string(),
                    },
                );
            }

            if attempt == max_attempts {
                break;
            }

            let delay = self.retry.backoff_for(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = self.gate.closed() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(rule) = self.active_rule().or_else(|| self.gate.rules().first().cloned()) {
            self.events.emit_rule(
                &rule,
                EventKind::RetriesExhausted {
                    attempts: max_attempts,
                },
            );
        }
        Err(TransportError::RetriesExhausted {
            link: self.link_name(),
            attempts: max_attempts,
        })
    }

    fn active_rule(&self) -> Option<Rule> {
        let id = self.gate.current().active?;
        self.gate.rules().iter().find(|r| r.id == id).cloned()
    }
}

/// An established, acknowledged downstream session
#[derive(Debug)]
pub struct Link {
    stream: TcpStream,
    rule: Rule,
    peer: SocketAddr,
    ack_timeout: Duration,
}

impl Link {
    /// Rule the session was opened under
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one record and wait for its ack
    pub async fn send(&mut self, record: &Record) -> TransportResult<()> {
        write_message(&mut self.stream, &WireMessage::from(record)).await?;

        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        loop {
            let reply = tokio::time::timeout_at(deadline, read_message(&mut self.stream)).await;
            match reply {
                Ok(Ok(Some(WireMessage::Ack { seq }))) if seq == record.seq => return Ok(()),
                Ok(Ok(Some(other))) => {
                    trace!(kind = other.kind(), "skipping message while waiting for ack");
                }
                Ok(Ok(None)) => return Err(TransportError::StreamClosed),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(TransportError::AckTimeout {
                        seq: record.seq,
                        timeout_ms: self.ack_timeout.as_millis() as u64,
                    });
                }
            }
        }
    }

    /// Send `Done` and close the stream
    pub async fn close(mut self) {
        let _ = write_message(&mut self.stream, &WireMessage::Done).await;
        let _ = self.stream.shutdown().await;
    }
}

/// Send a probe to `addr` and report whether it was answered
pub async fn send_probe(addr: &str, id: u64, timeout: Duration) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(addr).await?;
        write_message(&mut stream, &WireMessage::Probe { id }).await?;
        let answered = matches!(
            read_message(&mut stream).await?,
            Some(WireMessage::ProbeAck { id: acked }) if acked == id
        );
        TransportResult::Ok(answered)
    };
    matches!(tokio::time::timeout(timeout, attempt).await, Ok(Ok(true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_for(1), Duration::from_millis(250));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(500));
        assert_eq!(retry.backoff_for(4), Duration::from_secs(2));
        assert_eq!(retry.backoff_for(5), Duration::from_secs(4));
        assert_eq!(retry.backoff_for(30), Duration::from_secs(4));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryConfig::default().with_max_attempts(0).max_attempts, 1);
    }
}
