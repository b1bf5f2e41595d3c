//! Window gates
//!
//! A [`GateController`] publishes the [`LinkState`] of one or more rules on
//! a watch channel; every task that must react to a window transition holds
//! a [`WindowGate`] instead of polling the clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::clock::Clock;
use crate::rule::Rule;
use crate::window::{self, LinkState, WindowState};

/// Create a controller/gate pair for `rules`, initialised at `elapsed`
pub fn gate(rules: Vec<Rule>, elapsed: Duration) -> (GateController, WindowGate) {
    let rules: Arc<[Rule]> = rules.into();
    let (tx, rx) = watch::channel(window::combined_state(&rules, elapsed));
    (
        GateController {
            rules: rules.clone(),
            tx,
        },
        WindowGate { rules, rx },
    )
}

/// Publishing side of a gate
#[derive(Debug)]
pub struct GateController {
    rules: Arc<[Rule]>,
    tx: watch::Sender<LinkState>,
}

impl GateController {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn current(&self) -> LinkState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> WindowGate {
        WindowGate {
            rules: self.rules.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Publish a state directly. Returns whether it changed.
    ///
    /// EXPIRED is terminal: once published, later states are ignored.
    pub fn publish(&self, next: LinkState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.state == WindowState::Expired || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Recompute from `elapsed` and publish
    pub fn update(&self, elapsed: Duration) -> LinkState {
        self.publish(window::combined_state(&self.rules, elapsed));
        self.current()
    }

    /// Follow `clock` until every rule has expired or `cancel` fires.
    ///
    /// `on_change` sees the initial state and every transition after it.
    pub async fn drive<F>(self, clock: Arc<dyn Clock>, cancel: CancellationToken, mut on_change: F)
    where
        F: FnMut(LinkState) + Send,
    {
        on_change(self.update(clock.elapsed()));

        loop {
            let elapsed = clock.elapsed();
            if self.publish(window::combined_state(&self.rules, elapsed)) {
                on_change(self.current());
            }

            let Some(wait) = window::combined_next_transition(&self.rules, elapsed) else {
                break;
            };
            trace!(wait_ms = wait.as_millis() as u64, "gate sleeping until next transition");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(clock.to_real(wait)) => {}
            }
        }
    }
}

/// Subscribing side of a gate
#[derive(Debug, Clone)]
pub struct WindowGate {
    rules: Arc<[Rule]>,
    rx: watch::Receiver<LinkState>,
}

impl WindowGate {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn current(&self) -> LinkState {
        *self.rx.borrow()
    }

    pub fn state(&self) -> WindowState {
        self.current().state
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Wait for the next published transition.
    ///
    /// Returns `None` once the controller is gone; no further transition
    /// can arrive after that.
    pub async fn changed(&mut self) -> Option<LinkState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Wait until the published state satisfies `pred` (checked immediately)
    pub async fn wait_until<P>(&mut self, pred: P) -> Option<LinkState>
    where
        P: Fn(WindowState) -> bool,
    {
        self.rx
            .wait_for(|link| pred(link.state))
            .await
            .ok()
            .map(|link| *link)
    }

    /// Wait until the link leaves the current OPEN period
    pub async fn closed(&mut self) -> Option<LinkState> {
        self.wait_until(|state| !state.is_open()).await
    }

    /// Wait until the link is EXPIRED
    pub async fn expired(&mut self) -> Option<LinkState> {
        self.wait_until(|state| state == WindowState::Expired).await
    }
}
