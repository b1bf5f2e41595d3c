//! Window enforcement
//!
//! Pure functions from (rule, elapsed simulated time) to a window state.
//! Windows are half-open: `start_sec` itself is OPEN, `end_sec` itself is
//! EXPIRED, and EXPIRED is terminal.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rule::{Rule, RuleId, Window};

/// Whether a rule's link may carry traffic right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    /// Before `start_sec`
    Closed,
    /// Within `[start_sec, end_sec)`
    Open,
    /// At or after `end_sec`; permanent
    Expired,
}

impl WindowState {
    pub fn is_open(self) -> bool {
        self == WindowState::Open
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowState::Closed => "closed",
            WindowState::Open => "open",
            WindowState::Expired => "expired",
        }
    }
}

impl fmt::Display for WindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single window at `elapsed`
pub fn window_state(window: &Window, elapsed: Duration) -> WindowState {
    if elapsed < window.start() {
        WindowState::Closed
    } else if elapsed < window.end() {
        WindowState::Open
    } else {
        WindowState::Expired
    }
}

/// State of `rule` at `elapsed`
pub fn state(rule: &Rule, elapsed: Duration) -> WindowState {
    window_state(&rule.window, elapsed)
}

/// Time until `rule` next changes state, `None` once EXPIRED
pub fn next_transition(rule: &Rule, elapsed: Duration) -> Option<Duration> {
    match state(rule, elapsed) {
        WindowState::Closed => Some(rule.window.start() - elapsed),
        WindowState::Open => Some(rule.window.end() - elapsed),
        WindowState::Expired => None,
    }
}

/// Combined state of every rule governing one link
///
/// The port comes from the first OPEN rule in schedule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    pub state: WindowState,
    /// Rule currently carrying the link, set only while OPEN
    pub active: Option<RuleId>,
    pub port: Option<u16>,
}

impl LinkState {
    pub const EXPIRED: LinkState = LinkState {
        state: WindowState::Expired,
        active: None,
        port: None,
    };

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}

/// OPEN if any rule is open, EXPIRED once all are expired, CLOSED otherwise.
///
/// A link with no rules can never open and is EXPIRED.
pub fn combined_state(rules: &[Rule], elapsed: Duration) -> LinkState {
    let mut any_closed = false;
    for rule in rules {
        match state(rule, elapsed) {
            WindowState::Open => {
                return LinkState {
                    state: WindowState::Open,
                    active: Some(rule.id),
                    port: Some(rule.port),
                };
            }
            WindowState::Closed => any_closed = true,
            WindowState::Expired => {}
        }
    }

    if any_closed {
        LinkState {
            state: WindowState::Closed,
            active: None,
            port: None,
        }
    } else {
        LinkState::EXPIRED
    }
}

/// Soonest state change over all rules of a link
pub fn combined_next_transition(rules: &[Rule], elapsed: Duration) -> Option<Duration> {
    rules
        .iter()
        .filter_map(|rule| next_transition(rule, elapsed))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneName;

    fn rule(id: usize, start: u64, end: u64, port: u16) -> Rule {
        Rule {
            id: RuleId(id),
            source: ZoneName::new("a"),
            destination: ZoneName::new("b"),
            port,
            comment: None,
            window: Window::new(start, end).unwrap(),
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_half_open_boundaries() {
        let r = rule(0, 5, 15, 9000);
        assert_eq!(state(&r, secs(0.0)), WindowState::Closed);
        assert_eq!(state(&r, secs(4.999)), WindowState::Closed);
        assert_eq!(state(&r, secs(5.0)), WindowState::Open);
        assert_eq!(state(&r, secs(14.999)), WindowState::Open);
        assert_eq!(state(&r, secs(15.0)), WindowState::Expired);
        assert_eq!(state(&r, secs(1e6)), WindowState::Expired);
    }

    #[test]
    fn test_transitions_are_monotonic_and_happen_once() {
        let r = rule(0, 3, 7, 9000);
        let mut seen = Vec::new();
        let mut t = Duration::ZERO;
        while t < secs(10.0) {
            let s = state(&r, t);
            if seen.last() != Some(&s) {
                seen.push(s);
            }
            t += Duration::from_millis(250);
        }
        assert_eq!(
            seen,
            vec![WindowState::Closed, WindowState::Open, WindowState::Expired]
        );
    }

    #[test]
    fn test_next_transition() {
        let r = rule(0, 5, 15, 9000);
        assert_eq!(next_transition(&r, secs(2.0)), Some(secs(3.0)));
        assert_eq!(next_transition(&r, secs(5.0)), Some(secs(10.0)));
        assert_eq!(next_transition(&r, secs(14.5)), Some(secs(0.5)));
        assert_eq!(next_transition(&r, secs(15.0)), None);
    }

    #[test]
    fn test_next_transition_lands_on_new_state() {
        let r = rule(0, 5, 15, 9000);
        let t = secs(1.25);
        let wait = next_transition(&r, t).unwrap();
        assert_eq!(state(&r, t + wait), WindowState::Open);
        let t = t + wait;
        let wait = next_transition(&r, t).unwrap();
        assert_eq!(state(&r, t + wait), WindowState::Expired);
    }

    #[test]
    fn test_combined_state_prefers_first_open_rule() {
        let rules = vec![rule(0, 0, 10, 9000), rule(1, 5, 20, 9001)];

        let s = combined_state(&rules, secs(6.0));
        assert_eq!(s.state, WindowState::Open);
        assert_eq!(s.active, Some(RuleId(0)));
        assert_eq!(s.port, Some(9000));

        let s = combined_state(&rules, secs(12.0));
        assert_eq!(s.active, Some(RuleId(1)));
        assert_eq!(s.port, Some(9001));

        assert_eq!(combined_state(&rules, secs(20.0)), LinkState::EXPIRED);
    }

    #[test]
    fn test_combined_state_closed_between_windows() {
        let rules = vec![rule(0, 0, 5, 9000), rule(1, 10, 20, 9001)];
        let s = combined_state(&rules, secs(7.0));
        assert_eq!(s.state, WindowState::Closed);
        assert_eq!(s.port, None);
        assert_eq!(combined_next_transition(&rules, secs(7.0)), Some(secs(3.0)));
    }

    #[test]
    fn test_combined_state_without_rules_is_expired() {
        assert_eq!(combined_state(&[], Duration::ZERO), LinkState::EXPIRED);
        assert_eq!(combined_next_transition(&[], Duration::ZERO), None);
    }
}
