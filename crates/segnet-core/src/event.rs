//! Zone events
//!
//! Every accept/refuse/connect/forward/drop/expire transition of a zone is a
//! [`ZoneEvent`]. [`EventBus::emit`] writes it to the `segnet::event`
//! tracing target (the append-only event log) and broadcasts it to
//! in-process subscribers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::rule::{Rule, RuleId};
use crate::window::WindowState;
use crate::zone::ZoneName;

/// Tracing target of the event log
pub const EVENT_TARGET: &str = "segnet::event";

/// Lifecycle phase of a zone agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentPhase::Starting => "starting",
            AgentPhase::Running => "running",
            AgentPhase::Draining => "draining",
            AgentPhase::Stopped => "stopped",
        })
    }
}

/// Why a payload unit was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropCause {
    /// Link buffer full
    Backpressure,
    /// Governing window expired before the unit could be forwarded
    Expired,
    /// Agent shut down before the window expired
    Shutdown,
    /// Larger than a link frame can carry
    Oversize,
}

impl DropCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DropCause::Backpressure => "backpressure",
            DropCause::Expired => "expired",
            DropCause::Shutdown => "shutdown",
            DropCause::Oversize => "oversize",
        }
    }
}

/// Why an inbound connection was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefuseReason {
    WindowClosed,
    /// Hello named a different source or destination than the rule
    WrongPeer,
    /// No or malformed hello
    Handshake,
}

impl RefuseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RefuseReason::WindowClosed => "window_closed",
            RefuseReason::WrongPeer => "wrong_peer",
            RefuseReason::Handshake => "handshake",
        }
    }
}

/// Result of a segmentation probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    Refused,
    /// The remote accepted the probe; `local` is this zone's view of the window
    Admitted { local: WindowState },
}

impl ProbeOutcome {
    /// Admission outside the locally known window
    pub fn is_violation(&self) -> bool {
        matches!(self, ProbeOutcome::Admitted { local } if !local.is_open())
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Phase(AgentPhase),
    Window(WindowState),
    Listening { addr: SocketAddr },
    ListenerStopped,
    Accepted { peer: SocketAddr },
    Refused { peer: Option<SocketAddr>, reason: RefuseReason },
    Connected { attempt: u32 },
    ConnectFailed { attempt: u32, error: String },
    /// Connection attempted outside the window
    Unavailable(WindowState),
    RetriesExhausted { attempts: u32 },
    Received { seq: u64, bytes: usize },
    Forwarded { seq: u64, bytes: usize },
    Delivered { seq: u64, bytes: usize },
    Dropped { seq: u64, cause: DropCause },
    Probe { id: u64, outcome: ProbeOutcome },
    Drained { forwarded: u64, dropped: u64 },
}

impl EventKind {
    /// Short event name used in the log's `event` field
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Phase(_) => "phase",
            EventKind::Window(_) => "window",
            EventKind::Listening { .. } => "listen",
            EventKind::ListenerStopped => "listener_stopped",
            EventKind::Accepted { .. } => "accept",
            EventKind::Refused { .. } => "refuse",
            EventKind::Connected { .. } => "connect",
            EventKind::ConnectFailed { .. } => "connect_failed",
            EventKind::Unavailable(_) => "unavailable",
            EventKind::RetriesExhausted { .. } => "retries_exhausted",
            EventKind::Received { .. } => "receive",
            EventKind::Forwarded { .. } => "forward",
            EventKind::Delivered { .. } => "deliver",
            EventKind::Dropped { .. } => "drop",
            EventKind::Probe { .. } => "probe",
            EventKind::Drained { .. } => "drained",
        }
    }

    /// Sub-classification for aggregation (drop cause, refuse reason, ...)
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            EventKind::Phase(phase) => Some(match phase {
                AgentPhase::Starting => "starting",
                AgentPhase::Running => "running",
                AgentPhase::Draining => "draining",
                AgentPhase::Stopped => "stopped",
            }),
            EventKind::Window(state) | EventKind::Unavailable(state) => Some(state.as_str()),
            EventKind::Refused { reason, .. } => Some(reason.as_str()),
            EventKind::Dropped { cause, .. } => Some(cause.as_str()),
            EventKind::Probe { outcome, .. } => Some(match outcome {
                ProbeOutcome::Refused => "refused",
                ProbeOutcome::Admitted { .. } if outcome.is_violation() => "violation",
                ProbeOutcome::Admitted { .. } => "admitted",
            }),
            _ => None,
        }
    }

    fn is_warning(&self) -> bool {
        match self {
            EventKind::Refused { .. }
            | EventKind::Unavailable(_)
            | EventKind::Dropped { .. }
            | EventKind::ConnectFailed { .. } => true,
            EventKind::Probe { outcome, .. } => outcome.is_violation(),
            _ => false,
        }
    }

    fn is_error(&self) -> bool {
        matches!(self, EventKind::RetriesExhausted { .. })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Phase(phase) => write!(f, "agent {phase}"),
            EventKind::Window(state) => write!(f, "window {state}"),
            EventKind::Listening { addr } => write!(f, "listening on {addr}"),
            EventKind::ListenerStopped => write!(f, "listener stopped"),
            EventKind::Accepted { peer } => write!(f, "accepted {peer}"),
            EventKind::Refused { peer: Some(peer), reason } => {
                write!(f, "refused {peer}: {}", reason.as_str())
            }
            EventKind::Refused { peer: None, reason } => write!(f, "refused: {}", reason.as_str()),
            EventKind::Connected { attempt } => write!(f, "connected on attempt {attempt}"),
            EventKind::ConnectFailed { attempt, error } => {
                write!(f, "attempt {attempt} failed: {error}")
            }
            EventKind::Unavailable(state) => write!(f, "link unavailable while {state}"),
            EventKind::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} attempts")
            }
            EventKind::Received { seq, bytes } => write!(f, "received #{seq} ({bytes} bytes)"),
            EventKind::Forwarded { seq, bytes } => write!(f, "forwarded #{seq} ({bytes} bytes)"),
            EventKind::Delivered { seq, bytes } => write!(f, "delivered #{seq} ({bytes} bytes)"),
            EventKind::Dropped { seq, cause } => write!(f, "dropped #{seq}: {}", cause.as_str()),
            EventKind::Probe { id, outcome } => match outcome {
                ProbeOutcome::Refused => write!(f, "probe {id} refused"),
                ProbeOutcome::Admitted { local } => {
                    write!(f, "probe {id} admitted (local window {local})")
                }
            },
            EventKind::Drained { forwarded, dropped } => {
                write!(f, "drained: {forwarded} forwarded, {dropped} dropped")
            }
        }
    }
}

/// One observable state transition of a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub zone: ZoneName,
    pub rule: Option<RuleId>,
    pub link: Option<String>,
    pub port: Option<u16>,
    /// Simulated seconds since the origin
    pub sim_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// Emits zone events to the event log and to subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    zone: ZoneName,
    clock: Arc<dyn Clock>,
    tx: broadcast::Sender<ZoneEvent>,
}

impl EventBus {
    pub fn new(zone: ZoneName, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { zone, clock, tx }
    }

    pub fn zone(&self) -> &ZoneName {
        &self.zone
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ZoneEvent> {
        self.tx.subscribe()
    }

    /// Zone-wide event
    pub fn emit(&self, kind: EventKind) -> ZoneEvent {
        self.publish(None, None, kind)
    }

    /// Event about `rule`; the port is the rule's port
    pub fn emit_rule(&self, rule: &Rule, kind: EventKind) -> ZoneEvent {
        self.publish(Some(rule), Some(rule.port), kind)
    }

    /// Event about `rule` where the port may differ from the rule's
    pub fn emit_rule_port(&self, rule: &Rule, port: Option<u16>, kind: EventKind) -> ZoneEvent {
        self.publish(Some(rule), port, kind)
    }

    fn publish(&self, rule: Option<&Rule>, port: Option<u16>, kind: EventKind) -> ZoneEvent {
        let event = ZoneEvent {
            zone: self.zone.clone(),
            rule: rule.map(|r| r.id),
            link: rule.map(Rule::link),
            port,
            sim_secs: self.clock.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
            kind,
        };
        log_event(&event);
        // no subscribers is fine
        let _ = self.tx.send(event.clone());
        event
    }
}

fn log_event(event: &ZoneEvent) {
    let zone = event.zone.as_str();
    let rule = event.rule.map(|r| r.0);
    let link = event.link.as_deref();
    let name = event.kind.name();
    let tag = event.kind.tag();
    let sim_secs = (event.sim_secs * 1000.0).round() / 1000.0;

    if event.kind.is_error() {
        tracing::error!(target: EVENT_TARGET, zone, rule, link, port = event.port, event = name, outcome = tag, sim_secs, "{}", event.kind);
    } else if event.kind.is_warning() {
        tracing::warn!(target: EVENT_TARGET, zone, rule, link, port = event.port, event = name, outcome = tag, sim_secs, "{}", event.kind);
    } else {
        tracing::info!(target: EVENT_TARGET, zone, rule, link, port = event.port, event = name, outcome = tag, sim_secs, "{}", event.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rule::Window;
    use std::time::Duration;

    fn bus() -> EventBus {
        let clock = ManualClock::at(Duration::from_millis(12_500));
        EventBus::new(ZoneName::new("control_zone"), Arc::new(clock), 16)
    }

    #[test]
    fn test_emit_carries_rule_and_clock() {
        let bus = bus();
        let mut rx = bus.subscribe();
        let rule = Rule {
            id: RuleId(1),
            source: "forecast_zone".into(),
            destination: "control_zone".into(),
            port: 9102,
            comment: None,
            window: Window::new(10, 20).unwrap(),
        };

        bus.emit_rule(&rule, EventKind::Received { seq: 3, bytes: 42 });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.zone, ZoneName::new("control_zone"));
        assert_eq!(event.rule, Some(RuleId(1)));
        assert_eq!(event.link.as_deref(), Some("forecast_zone->control_zone"));
        assert_eq!(event.port, Some(9102));
        assert!((event.sim_secs - 12.5).abs() < 1e-9);
        assert_eq!(event.kind.name(), "receive");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let event = bus().emit(EventKind::Phase(AgentPhase::Running));
        assert_eq!(event.kind.tag(), Some("running"));
        assert!(event.rule.is_none());
    }

    #[test]
    fn test_probe_violation() {
        let outcome = ProbeOutcome::Admitted {
            local: WindowState::Closed,
        };
        assert!(outcome.is_violation());
        let kind = EventKind::Probe { id: 7, outcome };
        assert_eq!(kind.tag(), Some("violation"));

        let fine = ProbeOutcome::Admitted {
            local: WindowState::Open,
        };
        assert!(!fine.is_violation());
        assert!(!ProbeOutcome::Refused.is_violation());
    }

    #[test]
    fn test_drop_display() {
        let kind = EventKind::Dropped {
            seq: 4,
            cause: DropCause::Backpressure,
        };
        assert_eq!(kind.to_string(), "dropped #4: backpressure");
        assert_eq!(kind.tag(), Some("backpressure"));
    }
}
