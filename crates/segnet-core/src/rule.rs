//! Time-gated link rules

use std::fmt;
use std::time::Duration;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::zone::ZoneName;

/// Position of a rule in the schedule's `rules` sequence
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display("#{_0}")]
pub struct RuleId(pub usize);

/// Half-open interval `[start_sec, end_sec)` in simulated seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds")]
pub struct Window {
    start_sec: u64,
    end_sec: u64,
}

#[derive(Deserialize)]
struct WindowBounds {
    start_sec: u64,
    end_sec: u64,
}

impl TryFrom<WindowBounds> for Window {
    type Error = String;

    fn try_from(bounds: WindowBounds) -> Result<Self, Self::Error> {
        Window::new(bounds.start_sec, bounds.end_sec).ok_or_else(|| {
            format!(
                "window [{}, {}) is empty",
                bounds.start_sec, bounds.end_sec
            )
        })
    }
}

impl Window {
    /// Returns `None` unless `start_sec < end_sec`.
    pub fn new(start_sec: u64, end_sec: u64) -> Option<Self> {
        (start_sec < end_sec).then_some(Self { start_sec, end_sec })
    }

    pub fn start_sec(&self) -> u64 {
        self.start_sec
    }

    pub fn end_sec(&self) -> u64 {
        self.end_sec
    }

    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_sec)
    }

    pub fn end(&self) -> Duration {
        Duration::from_secs(self.end_sec)
    }

    pub fn duration(&self) -> Duration {
        self.end() - self.start()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_sec, self.end_sec)
    }
}

/// A permitted link between two adjacent zones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub source: ZoneName,
    pub destination: ZoneName,
    pub port: u16,
    /// Descriptive only
    pub comment: Option<String>,
    pub window: Window,
}

impl Rule {
    /// `source->destination`, the key used to group rules of one link
    pub fn link(&self) -> String {
        format!("{}->{}", self.source, self.destination)
    }

    pub fn connects(&self, source: &str, destination: &str) -> bool {
        self.source == *source && self.destination == *destination
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}->{}:{} {}",
            self.id, self.source, self.destination, self.port, self.window
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_requires_start_before_end() {
        assert!(Window::new(5, 15).is_some());
        assert!(Window::new(15, 15).is_none());
        assert!(Window::new(20, 15).is_none());
    }

    #[test]
    fn test_deserialized_window_is_checked() {
        let window: Window = serde_json::from_str(r#"{"start_sec":5,"end_sec":15}"#).unwrap();
        assert_eq!(window, Window::new(5, 15).unwrap());

        let err = serde_json::from_str::<Window>(r#"{"start_sec":15,"end_sec":15}"#).unwrap_err();
        assert!(err.to_string().contains("is empty"), "{err}");
    }

    #[test]
    fn test_rule_display() {
        let rule = Rule {
            id: RuleId(2),
            source: "a".into(),
            destination: "b".into(),
            port: 9001,
            comment: None,
            window: Window::new(5, 15).unwrap(),
        };
        assert_eq!(rule.to_string(), "#2 a->b:9001 [5, 15)");
        assert_eq!(rule.link(), "a->b");
        assert!(rule.connects("a", "b"));
        assert!(!rule.connects("b", "a"));
    }
}
