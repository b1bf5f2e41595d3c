//! Schedule loading and window enforcement tests
//!
//! Covers:
//! - Chain topology validation
//! - Rule validation (adjacency, windows, ports)
//! - Window state over time, including boundaries
//! - Multiple rules governing one link

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use segnet_core::window::{self, combined_next_transition, combined_state};
use segnet_core::{Role, RuleId, Schedule, SchemaError, WindowState, ZoneName};

// ============================================================================
// Fixtures
// ============================================================================

/// The four-zone SCADA chain used throughout the deployment examples
const SCADA: &str = r#"{
    "zones": {
        "data_ingestion_zone": { "role": "client", "target": "forecast_zone" },
        "forecast_zone": {
            "role": "server_client",
            "listen_source": "data_ingestion_zone",
            "target": "control_zone"
        },
        "control_zone": {
            "role": "server_client",
            "listen_source": "forecast_zone",
            "target": "hmi_zone"
        },
        "hmi_zone": { "role": "server", "listen_source": "control_zone" }
    },
    "rules": [
        { "source": "data_ingestion_zone", "destination": "forecast_zone", "port": 9001,
          "comment": "raw meteorological data", "start_sec": 5, "end_sec": 15 },
        { "source": "forecast_zone", "destination": "control_zone", "port": 9002,
          "comment": "forecast results", "start_sec": 25, "end_sec": 30 },
        { "source": "control_zone", "destination": "hmi_zone", "port": 9003,
          "comment": "operational values", "start_sec": 40, "end_sec": 55 }
    ]
}"#;

fn with_rules(rules: &str) -> String {
    let start = SCADA.find("\"rules\"").unwrap();
    format!("{}\"rules\": {rules}\n}}", &SCADA[..start])
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

// ============================================================================
// Topology
// ============================================================================

#[test]
fn test_scada_chain_is_one_path() {
    let schedule = Schedule::load(SCADA).unwrap();

    let chain: Vec<&str> = schedule.chain().iter().map(ZoneName::as_str).collect();
    assert_eq!(
        chain,
        ["data_ingestion_zone", "forecast_zone", "control_zone", "hmi_zone"]
    );
    assert_eq!(schedule.head().role, Role::Client);
    assert_eq!(schedule.tail().role, Role::Server);
    assert!(schedule.head().is_head());
    assert!(schedule.tail().is_tail());

    let roles: Vec<Role> = schedule.zones().map(|z| z.role).collect();
    assert_eq!(roles.iter().filter(|r| **r == Role::Client).count(), 1);
    assert_eq!(roles.iter().filter(|r| **r == Role::Server).count(), 1);
}

#[test]
fn test_rule_queries() {
    let schedule = Schedule::load(SCADA).unwrap();

    let out = schedule.rules_where_source("forecast_zone");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].port, 9002);
    assert_eq!(out[0].comment.as_deref(), Some("forecast results"));

    let inbound = schedule.rules_where_destination("forecast_zone");
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].id, RuleId(0));

    assert_eq!(schedule.governing_rules("forecast_zone").len(), 2);
    assert_eq!(schedule.governing_rules("hmi_zone").len(), 1);
    assert!(schedule.rules_where_source("hmi_zone").is_empty());
    assert_eq!(schedule.horizon_sec(), 55);
}

#[test]
fn test_asymmetric_adjacency_is_rejected() {
    let raw = SCADA.replace(
        r#""listen_source": "forecast_zone""#,
        r#""listen_source": "data_ingestion_zone""#,
    );
    let err = Schedule::load(&raw).unwrap_err();
    assert!(matches!(err, SchemaError::InvalidZone { .. }), "{err}");
}

#[test]
fn test_detached_cycle_is_rejected() {
    // a/b form a valid chain, x/y point at each other off to the side
    let raw = r#"{
        "zones": {
            "a": { "role": "client", "target": "b" },
            "b": { "role": "server", "listen_source": "a" },
            "x": { "role": "server_client", "listen_source": "y", "target": "y" },
            "y": { "role": "server_client", "listen_source": "x", "target": "x" }
        }
    }"#;
    let err = Schedule::load(raw).unwrap_err();
    assert!(matches!(err, SchemaError::BrokenChain(_)), "{err}");
}

#[test]
fn test_two_clients_are_rejected() {
    let raw = r#"{
        "zones": {
            "a": { "role": "client", "target": "c" },
            "b": { "role": "client", "target": "c" },
            "c": { "role": "server", "listen_source": "a" }
        }
    }"#;
    assert_err!(Schedule::load(raw));
}

#[test]
fn test_unknown_role_is_malformed() {
    let raw = SCADA.replace(r#""role": "server""#, r#""role": "gateway""#);
    assert!(matches!(Schedule::load(&raw), Err(SchemaError::Malformed(_))));
}

// ============================================================================
// Rules
// ============================================================================

#[test]
fn test_non_adjacent_rule_is_rejected() {
    let raw = with_rules(
        r#"[{ "source": "data_ingestion_zone", "destination": "hmi_zone",
              "port": 9009, "start_sec": 0, "end_sec": 10 }]"#,
    );
    let err = Schedule::load(&raw).unwrap_err();
    assert!(
        matches!(&err, SchemaError::NotAdjacent { rule, .. } if *rule == RuleId(0)),
        "{err}"
    );
}

#[test]
fn test_reversed_rule_is_rejected() {
    let raw = with_rules(
        r#"[{ "source": "forecast_zone", "destination": "data_ingestion_zone",
              "port": 9001, "start_sec": 0, "end_sec": 10 }]"#,
    );
    assert!(matches!(
        Schedule::load(&raw),
        Err(SchemaError::NotAdjacent { .. })
    ));
}

#[test]
fn test_unknown_zone_in_rule() {
    let raw = with_rules(
        r#"[{ "source": "historian", "destination": "hmi_zone",
              "port": 9009, "start_sec": 0, "end_sec": 10 }]"#,
    );
    assert!(matches!(
        Schedule::load(&raw),
        Err(SchemaError::UnknownZone { zone, .. }) if zone == "historian"
    ));
}

#[test]
fn test_empty_and_negative_windows() {
    for (start, end) in [(10, 10), (15, 5), (-1, 5)] {
        let raw = with_rules(&format!(
            r#"[{{ "source": "control_zone", "destination": "hmi_zone",
                  "port": 9003, "start_sec": {start}, "end_sec": {end} }}]"#
        ));
        let err = Schedule::load(&raw).unwrap_err();
        assert!(
            matches!(err, SchemaError::InvalidWindow { start_sec, end_sec, .. }
                if start_sec == start && end_sec == end),
            "[{start}, {end}) accepted"
        );
    }
}

#[test]
fn test_port_range() {
    for port in [0, 65536, -80] {
        let raw = with_rules(&format!(
            r#"[{{ "source": "control_zone", "destination": "hmi_zone",
                  "port": {port}, "start_sec": 0, "end_sec": 5 }}]"#
        ));
        assert!(
            matches!(Schedule::load(&raw), Err(SchemaError::InvalidPort { .. })),
            "port {port} accepted"
        );
    }
}

#[test]
fn test_port_conflict_on_one_destination() {
    let raw = with_rules(
        r#"[
            { "source": "control_zone", "destination": "hmi_zone", "port": 9003, "start_sec": 0, "end_sec": 5 },
            { "source": "control_zone", "destination": "hmi_zone", "port": 9003, "start_sec": 10, "end_sec": 20 }
        ]"#,
    );
    let err = Schedule::load(&raw).unwrap_err();
    assert!(matches!(
        err,
        SchemaError::PortConflict { rule: RuleId(1), other: RuleId(0), port: 9003, .. }
    ));
}

#[test]
fn test_same_port_on_different_destinations() {
    let raw = with_rules(
        r#"[
            { "source": "forecast_zone", "destination": "control_zone", "port": 9000, "start_sec": 0, "end_sec": 5 },
            { "source": "control_zone", "destination": "hmi_zone", "port": 9000, "start_sec": 0, "end_sec": 5 }
        ]"#,
    );
    assert_ok!(Schedule::load(&raw));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Schedule::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, SchemaError::Unreadable { .. }));
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.json");
    std::fs::write(&path, SCADA).unwrap();
    assert_eq!(Schedule::from_path(&path).unwrap().rules().len(), 3);
}

// ============================================================================
// Windows
// ============================================================================

#[test]
fn test_state_is_monotonic_and_half_open() {
    let schedule = Schedule::load(SCADA).unwrap();
    let rule = &schedule.rules()[0];

    let states: Vec<WindowState> = (0..=20).map(|t| window::state(rule, secs(t))).collect();
    for (t, state) in states.iter().enumerate() {
        let expected = match t {
            0..=4 => WindowState::Closed,
            5..=14 => WindowState::Open,
            _ => WindowState::Expired,
        };
        assert_eq!(*state, expected, "t={t}");
    }

    // each state appears in one contiguous run
    let mut runs = states.clone();
    runs.dedup();
    assert_eq!(
        runs,
        [WindowState::Closed, WindowState::Open, WindowState::Expired]
    );
}

#[test]
fn test_next_transition_points_at_boundaries() {
    let schedule = Schedule::load(SCADA).unwrap();
    let rule = &schedule.rules()[0];

    assert_eq!(window::next_transition(rule, secs(3)), Some(secs(2)));
    assert_eq!(window::next_transition(rule, secs(5)), Some(secs(10)));
    assert_eq!(
        window::next_transition(rule, Duration::from_millis(14_500)),
        Some(Duration::from_millis(500))
    );
    assert_eq!(window::next_transition(rule, secs(15)), None);
}

#[test]
fn test_link_with_two_rules() {
    let raw = with_rules(
        r#"[
            { "source": "control_zone", "destination": "hmi_zone", "port": 9003, "start_sec": 0, "end_sec": 5 },
            { "source": "control_zone", "destination": "hmi_zone", "port": 9004, "start_sec": 10, "end_sec": 20 }
        ]"#,
    );
    let schedule = Schedule::load(&raw).unwrap();
    let rules: Vec<_> = schedule
        .rules_where_source("control_zone")
        .into_iter()
        .cloned()
        .collect();

    let at = |t| combined_state(&rules, secs(t));
    assert_eq!(at(2).port, Some(9003));
    assert_eq!(at(7).state, WindowState::Closed);
    assert_eq!(at(12).port, Some(9004));
    assert_eq!(at(20).state, WindowState::Expired);

    assert_eq!(combined_next_transition(&rules, secs(7)), Some(secs(3)));
    assert_eq!(combined_next_transition(&rules, secs(20)), None);
}
