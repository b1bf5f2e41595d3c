//! Zone agent orchestrator
//!
//! Lifecycle of one zone process:
//!
//! ```text
//! STARTING  schedule loaded, identity resolved, listeners bound
//! RUNNING   listeners, relay or sink, probes; one gate driver per rule
//! DRAINING  every governing rule expired (or shutdown): tasks finish,
//!           buffers are flushed as drops, counts are collected
//! STOPPED   report returned
//! ```
//!
//! The schedule is an immutable value owned by the agent. Zones never talk
//! to each other outside their links; they agree only through the schedule
//! and the shared clock origin.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use segnet_core::{
    AgentPhase, Clock, EventBus, EventKind, GateController, Role, Rule, Schedule, Zone, ZoneEvent,
    ZoneName, gate,
};
use segnet_relay::{
    ChannelIngress, FeedSource, Ingress, LinkReport, RelayConfig, RelayPipeline, SinkReport,
    TerminalSink,
};
use segnet_transport::{Connector, EndpointPlan, ListenerReport, ZoneListener};

use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::probe::{ProbeReport, Prober};

/// Final counts of one zone, reported at DRAINING
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReport {
    pub zone: ZoneName,
    pub role: Role,
    /// Simulated seconds at which the agent stopped
    pub stopped_at: f64,
    /// DRAINING was entered by shutdown rather than window expiry
    pub interrupted: bool,
    pub listeners: Vec<ListenerReport>,
    /// Downstream link, if the zone has one
    pub link: Option<LinkReport>,
    /// Terminal sink of the tail zone
    pub sink: Option<SinkReport>,
    pub probes: Option<ProbeReport>,
}

impl AgentReport {
    /// Units this zone passed on: forwarded downstream, or delivered
    pub fn passed_on(&self) -> u64 {
        match (&self.link, &self.sink) {
            (Some(link), _) => link.forwarded,
            (None, Some(sink)) => sink.delivered,
            (None, None) => 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.link.as_ref().map(LinkReport::dropped).unwrap_or(0)
    }
}

/// Runs one zone of the chain
#[derive(Debug)]
pub struct ZoneAgent {
    schedule: Schedule,
    zone: Zone,
    config: AgentConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl ZoneAgent {
    /// Load the configured schedule and resolve this zone
    pub fn from_config(config: AgentConfig) -> AgentResult<Self> {
        let schedule = Schedule::from_path(&config.schedule_path)?;
        Self::new(schedule, config)
    }

    /// Agent for an already loaded schedule, clocked from the config
    pub fn new(schedule: Schedule, config: AgentConfig) -> AgentResult<Self> {
        let clock = config.clock();
        Self::with_clock(schedule, config, clock)
    }

    /// Agent on an explicit clock
    pub fn with_clock(schedule: Schedule, config: AgentConfig, clock: Arc<dyn Clock>) -> AgentResult<Self> {
        let zone = schedule.resolve(config.zone.as_deref())?.clone();
        let events = EventBus::new(zone.name.clone(), clock.clone(), config.event_channel_capacity);
        Ok(Self {
            schedule,
            zone,
            config,
            clock,
            events,
        })
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe before [`run`](Self::run) to see every event
    pub fn subscribe(&self) -> broadcast::Receiver<ZoneEvent> {
        self.events.subscribe()
    }

    /// Run until every governing rule has expired or `cancel` fires
    ///
    /// Fails only during STARTING, when a listener cannot be bound.
    #[instrument(skip_all, fields(zone = %self.zone.name, role = %self.zone.role))]
    pub async fn run(self, cancel: CancellationToken) -> AgentResult<AgentReport> {
        let Self {
            schedule,
            zone,
            config,
            clock,
            events,
        } = self;
        events.emit(EventKind::Phase(AgentPhase::Starting));

        let plan = EndpointPlan::for_zone(&schedule, &zone);
        let (inbound, upstream) =
            ChannelIngress::channel(format!("upstream of {}", zone.name), config.relay.buffer_capacity);

        // bind everything before a single task starts
        let mut listeners = Vec::with_capacity(plan.listeners.len());
        for rule in &plan.listeners {
            let (ctl, gate) = gate(vec![rule.clone()], clock.elapsed());
            let listener = ZoneListener::bind(
                rule.clone(),
                gate,
                inbound.clone(),
                events.clone(),
                config.listener.clone(),
            )
            .await?;
            listeners.push((ctl, listener));
        }
        drop(inbound);

        let work = cancel.child_token();
        let mut drivers = JoinSet::new();
        let mut tasks = Tasks::default();

        for (ctl, listener) in listeners {
            spawn_driver(&mut drivers, ctl, &clock, &events, &work);
            tasks.listeners.push(tokio::spawn(listener.run(work.clone())));
        }

        let ingress = if plan.is_listener() {
            ZoneIngress::Upstream(upstream)
        } else if zone.is_head() {
            ZoneIngress::Feed(open_feed(&config.feed_dir).await)
        } else {
            ZoneIngress::Idle
        };

        match (&plan.downstream, ingress) {
            (Some(down), ingress) => {
                let (ctl, link_gate) = gate(down.rules.clone(), clock.elapsed());
                let probe_gate = link_gate.clone();
                spawn_driver(&mut drivers, ctl, &clock, &events, &work);

                let connector = Connector::new(
                    zone.name.clone(),
                    down.target.clone(),
                    link_gate,
                    config.retry.clone(),
                    events.clone(),
                );
                let relay_config = config.relay.clone();
                tasks.link = Some(match ingress {
                    ZoneIngress::Upstream(upstream) => {
                        spawn_relay(upstream, connector, &events, relay_config, &work)
                    }
                    ZoneIngress::Feed(feed) => spawn_relay(feed, connector, &events, relay_config, &work),
                    ZoneIngress::Idle => spawn_relay(
                        FeedSource::empty(&config.feed_dir),
                        connector,
                        &events,
                        relay_config,
                        &work,
                    ),
                });

                if config.probe.is_enabled() {
                    let prober = Prober::new(
                        down.target.clone(),
                        probe_gate,
                        events.clone(),
                        config.probe.clone(),
                    );
                    tasks.probes = Some(tokio::spawn(prober.run(work.clone())));
                }
            }
            (None, ZoneIngress::Upstream(upstream)) => {
                let mut sink = TerminalSink::new(events.clone());
                if let Some(rule) = plan.listeners.first() {
                    sink = sink.with_rule(rule.clone());
                }
                tasks.sink = Some(tokio::spawn(sink.run(upstream, work.clone())));
            }
            (None, _) => warn!("zone has neither a downstream link nor upstream listeners"),
        }

        // DRAINING starts once every rule of this zone has expired
        let governing: Vec<Rule> = schedule
            .governing_rules(zone.name.as_str())
            .into_iter()
            .cloned()
            .collect();
        let (governing_ctl, mut governing) = gate(governing, clock.elapsed());
        drivers.spawn(governing_ctl.drive(clock.clone(), work.clone(), |_| {}));

        info!(
            listeners = tasks.listeners.len(),
            downstream = tasks.link.is_some(),
            horizon_sec = schedule.horizon_sec(),
            "zone running"
        );
        events.emit(EventKind::Phase(AgentPhase::Running));

        let interrupted = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = governing.expired() => false,
        };

        events.emit(EventKind::Phase(AgentPhase::Draining));
        info!(interrupted, "zone draining");

        let collect = tasks.join();
        tokio::pin!(collect);
        let settled = tokio::time::timeout(config.drain_grace, &mut collect).await;
        let reports = match settled {
            Ok(reports) => reports,
            Err(_) => {
                warn!(
                    grace_ms = config.drain_grace.as_millis() as u64,
                    "tasks still busy after the drain grace period, cancelling"
                );
                work.cancel();
                collect.await
            }
        };
        work.cancel();
        while drivers.join_next().await.is_some() {}

        let report = AgentReport {
            zone: zone.name.clone(),
            role: zone.role,
            stopped_at: clock.elapsed().as_secs_f64(),
            interrupted,
            listeners: reports.listeners,
            link: reports.link,
            sink: reports.sink,
            probes: reports.probes,
        };
        events.emit(EventKind::Drained {
            forwarded: report.passed_on(),
            dropped: report.dropped(),
        });
        events.emit(EventKind::Phase(AgentPhase::Stopped));
        Ok(report)
    }
}

enum ZoneIngress {
    Upstream(ChannelIngress),
    Feed(FeedSource),
    Idle,
}

#[derive(Default)]
struct Tasks {
    listeners: Vec<JoinHandle<ListenerReport>>,
    link: Option<JoinHandle<LinkReport>>,
    sink: Option<JoinHandle<SinkReport>>,
    probes: Option<JoinHandle<ProbeReport>>,
}

struct Reports {
    listeners: Vec<ListenerReport>,
    link: Option<LinkReport>,
    sink: Option<SinkReport>,
    probes: Option<ProbeReport>,
}

impl Tasks {
    async fn join(self) -> Reports {
        let mut listeners = Vec::with_capacity(self.listeners.len());
        for handle in self.listeners {
            if let Some(report) = joined(handle, "listener").await {
                listeners.push(report);
            }
        }
        Reports {
            listeners,
            link: match self.link {
                Some(handle) => joined(handle, "relay").await,
                None => None,
            },
            sink: match self.sink {
                Some(handle) => joined(handle, "sink").await,
                None => None,
            },
            probes: match self.probes {
                Some(handle) => joined(handle, "probe").await,
                None => None,
            },
        }
    }
}

async fn joined<T>(handle: JoinHandle<T>, task: &'static str) -> Option<T> {
    match handle.await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(task, error = %e, "task ended abnormally");
            None
        }
    }
}

/// Follow the gate's rules on the clock, logging every window transition
fn spawn_driver(
    drivers: &mut JoinSet<()>,
    ctl: GateController,
    clock: &Arc<dyn Clock>,
    events: &EventBus,
    cancel: &CancellationToken,
) {
    let rules = ctl.rules().to_vec();
    let events = events.clone();
    drivers.spawn(ctl.drive(clock.clone(), cancel.clone(), move |link| {
        let rule = link
            .active
            .and_then(|id| rules.iter().find(|r| r.id == id))
            .or_else(|| rules.first());
        let kind = EventKind::Window(link.state);
        match rule {
            Some(rule) => events.emit_rule_port(rule, link.port.or(Some(rule.port)), kind),
            None => events.emit(kind),
        };
    }));
}

fn spawn_relay<I: Ingress + 'static>(
    ingress: I,
    connector: Connector,
    events: &EventBus,
    config: RelayConfig,
    cancel: &CancellationToken,
) -> JoinHandle<LinkReport> {
    let relay = RelayPipeline::new(ingress, connector, events.clone(), config);
    tokio::spawn(relay.run(cancel.clone()))
}

/// The head zone's feed; a missing feed means nothing to ingest
async fn open_feed(dir: &Path) -> FeedSource {
    match FeedSource::open(dir).await {
        Ok(feed) => {
            info!(dir = %dir.display(), records = feed.len(), "feed opened");
            feed
        }
        Err(e) => {
            warn!(error = %e, "feed unavailable, nothing to ingest");
            FeedSource::empty(dir)
        }
    }
}
