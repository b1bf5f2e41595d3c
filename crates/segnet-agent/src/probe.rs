//! Segmentation probes
//!
//! A zone with a downstream link can probe it on purpose outside its own
//! gate: connect to a downstream listener, send `Probe` and see whether it
//! is answered. The listener answers only while its rule is OPEN, so an
//! answer while this zone believes the window is shut means the two sides
//! disagree on the schedule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use segnet_core::{EventBus, EventKind, ProbeOutcome, Rule, WindowGate, Zone, window};
use segnet_transport::send_probe;

use crate::config::ProbeConfig;

/// Probe counts of one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProbeReport {
    pub sent: u64,
    pub refused: u64,
    pub admitted: u64,
    /// Admissions while the local window was not OPEN
    pub violations: u64,
}

impl ProbeReport {
    fn record(&mut self, outcome: ProbeOutcome) {
        self.sent += 1;
        match outcome {
            ProbeOutcome::Refused => self.refused += 1,
            ProbeOutcome::Admitted { .. } => {
                self.admitted += 1;
                if outcome.is_violation() {
                    self.violations += 1;
                }
            }
        }
    }
}

/// Sends probes down one link until it expires
#[derive(Debug)]
pub struct Prober {
    target: Zone,
    gate: WindowGate,
    events: EventBus,
    config: ProbeConfig,
    rng: StdRng,
    next_id: u64,
    report: ProbeReport,
}

impl Prober {
    pub fn new(target: Zone, gate: WindowGate, events: EventBus, config: ProbeConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            target,
            gate,
            events,
            config,
            rng,
            next_id: 1,
            report: ProbeReport::default(),
        }
    }

    pub fn report(&self) -> ProbeReport {
        self.report
    }

    /// Probe one of the link's rules, picked at random
    pub async fn probe_once(&mut self) -> Option<ProbeOutcome> {
        let rules = self.gate.rules();
        if rules.is_empty() {
            return None;
        }
        let rule: Rule = rules[self.rng.random_range(0..rules.len())].clone();
        Some(self.probe_rule(&rule).await)
    }

    async fn probe_rule(&mut self, rule: &Rule) -> ProbeOutcome {
        let id = self.next_id;
        self.next_id += 1;

        let addr = format!("{}:{}", self.target.host, rule.port);
        debug!(%addr, id, "probing");
        let outcome = if send_probe(&addr, id, self.config.timeout).await {
            ProbeOutcome::Admitted {
                local: window::state(rule, self.events.clock().elapsed()),
            }
        } else {
            ProbeOutcome::Refused
        };

        self.events
            .emit_rule(rule, EventKind::Probe { id, outcome });
        self.report.record(outcome);
        outcome
    }

    /// Probe at every interval with the configured probability until the
    /// link expires or `cancel` fires
    #[instrument(skip_all, fields(target = %self.target.name))]
    pub async fn run(mut self, cancel: CancellationToken) -> ProbeReport {
        let mut expiry = self.gate.clone();
        let expired = async move { expiry.expired().await };
        tokio::pin!(expired);

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut expired => break,
                _ = ticker.tick() => {
                    if self.rng.random_bool(self.config.probability) {
                        self.probe_once().await;
                    }
                }
            }
        }
        self.report
    }
}
