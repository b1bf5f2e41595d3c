//! Schedule model
//!
//! The schedule is loaded once, validated completely and then never
//! mutated. Validation builds the zone graph and asserts the single-path
//! chain before any rule is looked at, so a [`Schedule`] value always
//! describes exactly one linear chain whose rules connect adjacent zones.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::{IdentityError, SchemaError, SchemaResult};
use crate::rule::{Rule, RuleId, Window};
use crate::zone::{Role, Zone, ZoneName};

#[derive(Debug, Deserialize)]
struct RawSchedule {
    zones: BTreeMap<String, RawZone>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawZone {
    role: Role,
    #[serde(default)]
    listen_source: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

// Numbers stay signed here so a negative port or offset is reported as a
// rule error rather than a parse error.
#[derive(Debug, Deserialize)]
struct RawRule {
    source: String,
    destination: String,
    port: i64,
    #[serde(default)]
    comment: Option<String>,
    start_sec: i64,
    end_sec: i64,
}

/// Validated, immutable zone/rule configuration
#[derive(Debug, Clone)]
pub struct Schedule {
    zones: BTreeMap<ZoneName, Zone>,
    chain: Vec<ZoneName>,
    rules: Vec<Rule>,
}

impl Schedule {
    /// Parse and validate a JSON schedule
    pub fn load(raw: &str) -> SchemaResult<Self> {
        let raw: RawSchedule =
            serde_json::from_str(raw).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Self::validate(raw)
    }

    /// Read, parse and validate a JSON schedule file
    pub fn from_path(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| SchemaError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::load(&raw)
    }

    fn validate(raw: RawSchedule) -> SchemaResult<Self> {
        if raw.zones.is_empty() {
            return Err(SchemaError::BrokenChain("schedule defines no zones".into()));
        }

        let zones = raw
            .zones
            .into_iter()
            .map(|(name, zone)| validate_zone(name, zone))
            .collect::<SchemaResult<BTreeMap<_, _>>>()?;

        check_adjacency(&zones)?;
        let chain = walk_chain(&zones)?;

        let mut rules = Vec::with_capacity(raw.rules.len());
        let mut bound: HashMap<(ZoneName, u16), RuleId> = HashMap::new();
        for (index, rule) in raw.rules.into_iter().enumerate() {
            let rule = validate_rule(RuleId(index), rule, &zones)?;
            if let Some(other) = bound.insert((rule.destination.clone(), rule.port), rule.id) {
                return Err(SchemaError::PortConflict {
                    rule: rule.id,
                    other,
                    destination: rule.destination.to_string(),
                    port: rule.port,
                });
            }
            rules.push(rule);
        }

        debug!(zones = chain.len(), rules = rules.len(), "schedule validated");
        Ok(Self {
            zones,
            chain,
            rules,
        })
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.get(name)
    }

    /// Resolve the identity of this process
    pub fn resolve(&self, name: Option<&str>) -> Result<&Zone, IdentityError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(IdentityError::Missing)?;
        self.zone(name)
            .ok_or_else(|| IdentityError::UnknownZone(name.to_string()))
    }

    /// Zones in chain order, head first
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.chain.iter().filter_map(|name| self.zones.get(name))
    }

    pub fn chain(&self) -> &[ZoneName] {
        &self.chain
    }

    /// All rules in schedule order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0)
    }

    pub fn rules_where_source(&self, zone: &str) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.source == *zone).collect()
    }

    pub fn rules_where_destination(&self, zone: &str) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.destination == *zone).collect()
    }

    /// Rules where `zone` is either end, in schedule order
    pub fn governing_rules(&self, zone: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.source == *zone || r.destination == *zone)
            .collect()
    }

    pub fn head(&self) -> &Zone {
        // chain is non-empty and built from `zones`
        &self.zones[&self.chain[0]]
    }

    pub fn tail(&self) -> &Zone {
        &self.zones[&self.chain[self.chain.len() - 1]]
    }

    /// Simulated second at which the last rule expires
    pub fn horizon_sec(&self) -> u64 {
        self.rules
            .iter()
            .map(|r| r.window.end_sec())
            .max()
            .unwrap_or(0)
    }
}

impl FromStr for Schedule {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::load(s)
    }
}

fn validate_zone(name: String, raw: RawZone) -> SchemaResult<(ZoneName, Zone)> {
    let invalid = |reason: &str| SchemaError::InvalidZone {
        zone: name.clone(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("zone name must not be empty"));
    }

    let listen_source = raw.listen_source.filter(|s| !s.is_empty());
    let target = raw.target.filter(|t| !t.is_empty());

    match (raw.role, listen_source.is_some(), target.is_some()) {
        (Role::Client, false, true) | (Role::Server, true, false) | (Role::ServerClient, true, true) => {}
        (Role::Client, _, _) => return Err(invalid("a client zone needs a target and no listen_source")),
        (Role::Server, _, _) => return Err(invalid("a server zone needs a listen_source and no target")),
        (Role::ServerClient, _, _) => {
            return Err(invalid("a server_client zone needs both a listen_source and a target"));
        }
    }

    if listen_source.as_deref() == Some(name.as_str()) || target.as_deref() == Some(name.as_str()) {
        return Err(invalid("a zone cannot link to itself"));
    }

    let host = raw
        .host
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| name.clone());

    let zone = Zone {
        name: ZoneName::new(name.clone()),
        role: raw.role,
        listen_source: listen_source.map(ZoneName::new),
        target: target.map(ZoneName::new),
        host,
    };
    Ok((zone.name.clone(), zone))
}

/// Every target must name a zone listening back at us, and vice versa
fn check_adjacency(zones: &BTreeMap<ZoneName, Zone>) -> SchemaResult<()> {
    for zone in zones.values() {
        if let Some(target) = &zone.target {
            let downstream = zones.get(target).ok_or_else(|| SchemaError::InvalidZone {
                zone: zone.name.to_string(),
                reason: format!("target '{target}' is not a zone"),
            })?;
            if downstream.listen_source.as_ref() != Some(&zone.name) {
                return Err(SchemaError::InvalidZone {
                    zone: zone.name.to_string(),
                    reason: format!("target '{target}' does not list it as listen_source"),
                });
            }
        }
        if let Some(listen_source) = &zone.listen_source {
            let upstream = zones.get(listen_source).ok_or_else(|| SchemaError::InvalidZone {
                zone: zone.name.to_string(),
                reason: format!("listen_source '{listen_source}' is not a zone"),
            })?;
            if upstream.target.as_ref() != Some(&zone.name) {
                return Err(SchemaError::InvalidZone {
                    zone: zone.name.to_string(),
                    reason: format!("listen_source '{listen_source}' does not target it"),
                });
            }
        }
    }
    Ok(())
}

/// Walk from the single client to the single server, covering every zone
fn walk_chain(zones: &BTreeMap<ZoneName, Zone>) -> SchemaResult<Vec<ZoneName>> {
    let clients: Vec<&Zone> = zones.values().filter(|z| z.role == Role::Client).collect();
    let servers = zones.values().filter(|z| z.role == Role::Server).count();

    let head = match clients.as_slice() {
        [head] => *head,
        [] => return Err(SchemaError::BrokenChain("no client zone".into())),
        many => {
            return Err(SchemaError::BrokenChain(format!(
                "{} client zones, expected exactly one",
                many.len()
            )));
        }
    };
    if servers != 1 {
        return Err(SchemaError::BrokenChain(format!(
            "{servers} server zones, expected exactly one"
        )));
    }

    let mut chain = vec![head.name.clone()];
    let mut seen: HashSet<&ZoneName> = HashSet::from([&head.name]);
    let mut current = head;
    while let Some(next) = &current.target {
        if !seen.insert(next) {
            return Err(SchemaError::BrokenChain(format!("cycle through '{next}'")));
        }
        chain.push(next.clone());
        // adjacency was checked, the target exists
        match zones.get(next) {
            Some(zone) => current = zone,
            None => return Err(SchemaError::BrokenChain(format!("dangling target '{next}'"))),
        }
    }

    if chain.len() != zones.len() {
        let unreachable: Vec<&str> = zones
            .keys()
            .filter(|name| !seen.contains(name))
            .map(ZoneName::as_str)
            .collect();
        return Err(SchemaError::BrokenChain(format!(
            "zones not reachable from '{}': {}",
            head.name,
            unreachable.join(", ")
        )));
    }
    Ok(chain)
}

fn validate_rule(id: RuleId, raw: RawRule, zones: &BTreeMap<ZoneName, Zone>) -> SchemaResult<Rule> {
    let source = zones.get(raw.source.as_str()).ok_or_else(|| SchemaError::UnknownZone {
        rule: id,
        zone: raw.source.clone(),
    })?;
    let destination = zones
        .get(raw.destination.as_str())
        .ok_or_else(|| SchemaError::UnknownZone {
            rule: id,
            zone: raw.destination.clone(),
        })?;

    let adjacent = source.target.as_ref() == Some(&destination.name)
        && destination.listen_source.as_ref() == Some(&source.name);
    if !adjacent {
        return Err(SchemaError::NotAdjacent {
            rule: id,
            from: raw.source,
            to: raw.destination,
        });
    }

    let window = u64::try_from(raw.start_sec)
        .ok()
        .zip(u64::try_from(raw.end_sec).ok())
        .and_then(|(start, end)| Window::new(start, end))
        .ok_or(SchemaError::InvalidWindow {
            rule: id,
            start_sec: raw.start_sec,
            end_sec: raw.end_sec,
        })?;

    let port = u16::try_from(raw.port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or(SchemaError::InvalidPort {
            rule: id,
            port: raw.port,
        })?;

    Ok(Rule {
        id,
        source: source.name.clone(),
        destination: destination.name.clone(),
        port,
        comment: raw.comment,
        window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ZONES: &str = r#"{
        "zones": {
            "a": { "role": "client", "target": "b" },
            "b": { "role": "server", "listen_source": "a", "host": "10.0.0.2" }
        },
        "rules": [
            { "source": "a", "destination": "b", "port": 9000, "start_sec": 5, "end_sec": 15 }
        ]
    }"#;

    #[test]
    fn test_load_minimal() {
        let schedule = Schedule::load(TWO_ZONES).unwrap();
        assert_eq!(schedule.chain(), &[ZoneName::new("a"), ZoneName::new("b")]);
        assert_eq!(schedule.head().name, ZoneName::new("a"));
        assert_eq!(schedule.tail().host, "10.0.0.2");
        assert_eq!(schedule.zone("a").unwrap().host, "a");
        assert_eq!(schedule.horizon_sec(), 15);
    }

    #[test]
    fn test_resolve_identity() {
        let schedule = Schedule::load(TWO_ZONES).unwrap();
        assert!(schedule.resolve(Some("b")).is_ok());
        assert!(matches!(schedule.resolve(None), Err(IdentityError::Missing)));
        assert!(matches!(schedule.resolve(Some("  ")), Err(IdentityError::Missing)));
        assert!(matches!(
            schedule.resolve(Some("hmi")),
            Err(IdentityError::UnknownZone(name)) if name == "hmi"
        ));
    }

    #[test]
    fn test_role_without_target_is_rejected() {
        let err = Schedule::load(
            r#"{"zones": {
                "a": { "role": "client" },
                "b": { "role": "server", "listen_source": "a" }
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidZone { zone, .. } if zone == "a"));
    }

    #[test]
    fn test_negative_port_is_rule_error() {
        let raw = TWO_ZONES.replace("9000", "-1");
        let err = Schedule::load(&raw).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidPort { port: -1, .. }));
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(Schedule::load("zones:"), Err(SchemaError::Malformed(_))));
    }
}
