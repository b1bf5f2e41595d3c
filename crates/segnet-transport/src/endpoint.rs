//! Role-specific endpoint plan
//!
//! Which listeners and which connector a zone runs follows from the
//! capability set of its role. `server_client` simply gets both halves;
//! they share nothing but the relay between them.

use segnet_core::{Capability, Rule, Schedule, Zone};

/// Downstream half of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamPlan {
    pub target: Zone,
    /// Rules of the link, in schedule order
    pub rules: Vec<Rule>,
}

/// Network components one zone must start
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointPlan {
    /// One listener per rule where the zone is destination
    pub listeners: Vec<Rule>,
    pub downstream: Option<DownstreamPlan>,
}

impl EndpointPlan {
    pub fn for_zone(schedule: &Schedule, zone: &Zone) -> Self {
        let mut plan = Self::default();
        for capability in zone.capabilities().iter() {
            match capability {
                Capability::Listener => {
                    plan.listeners = schedule
                        .rules_where_destination(zone.name.as_str())
                        .into_iter()
                        .cloned()
                        .collect();
                }
                Capability::Connector => {
                    let target = zone.target.as_ref().and_then(|t| schedule.zone(t.as_str()));
                    if let Some(target) = target {
                        plan.downstream = Some(DownstreamPlan {
                            target: target.clone(),
                            rules: schedule
                                .rules_where_source(zone.name.as_str())
                                .into_iter()
                                .cloned()
                                .collect(),
                        });
                    }
                }
            }
        }
        plan
    }

    pub fn is_listener(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// All rules of the plan, inbound first
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.listeners
            .iter()
            .chain(self.downstream.iter().flat_map(|d| d.rules.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"{
        "zones": {
            "a": { "role": "client", "target": "b" },
            "b": { "role": "server_client", "listen_source": "a", "target": "c" },
            "c": { "role": "server", "listen_source": "b" }
        },
        "rules": [
            { "source": "a", "destination": "b", "port": 9001, "start_sec": 0, "end_sec": 5 },
            { "source": "a", "destination": "b", "port": 9011, "start_sec": 10, "end_sec": 15 },
            { "source": "b", "destination": "c", "port": 9002, "start_sec": 5, "end_sec": 10 }
        ]
    }"#;

    #[test]
    fn test_plan_follows_capabilities() {
        let schedule = Schedule::load(CHAIN).unwrap();

        let head = EndpointPlan::for_zone(&schedule, schedule.zone("a").unwrap());
        assert!(!head.is_listener());
        let down = head.downstream.as_ref().unwrap();
        assert_eq!(down.target.name.as_str(), "b");
        assert_eq!(down.rules.len(), 2);

        let middle = EndpointPlan::for_zone(&schedule, schedule.zone("b").unwrap());
        let ports: Vec<u16> = middle.listeners.iter().map(|r| r.port).collect();
        assert_eq!(ports, [9001, 9011]);
        assert_eq!(middle.downstream.unwrap().rules[0].port, 9002);

        let tail = EndpointPlan::for_zone(&schedule, schedule.zone("c").unwrap());
        assert!(tail.downstream.is_none());
        assert_eq!(tail.rules().count(), 1);
    }
}
