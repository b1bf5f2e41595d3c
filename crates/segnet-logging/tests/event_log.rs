//! The event log receives zone events only, one JSON line each, appended

use std::sync::Arc;
use std::time::Duration;

use segnet_core::{
    DropCause, EventBus, EventKind, ManualClock, RefuseReason, Rule, RuleId, Window, ZoneName,
};
use segnet_logging::SegnetSubscriberBuilder;

fn rule() -> Rule {
    Rule {
        id: RuleId(1),
        source: ZoneName::new("forecast_zone"),
        destination: ZoneName::new("control_zone"),
        port: 9002,
        comment: None,
        window: Window::new(25, 30).unwrap(),
    }
}

fn write_events(path: &std::path::Path, kinds: Vec<EventKind>) {
    let (subscriber, guards) = SegnetSubscriberBuilder::new()
        .with_console(false)
        .with_event_log(path)
        .build()
        .unwrap();

    let clock = ManualClock::at(Duration::from_millis(26_250));
    let bus = EventBus::new(ZoneName::new("control_zone"), Arc::new(clock), 16);
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!("not a zone event");
        for kind in kinds {
            bus.emit_rule(&rule(), kind);
        }
    });
    // flushes the non-blocking writer
    drop(guards);
}

fn lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_one_line_per_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("control_zone.events.jsonl");

    write_events(
        &path,
        vec![
            EventKind::Received { seq: 0, bytes: 12 },
            EventKind::Dropped {
                seq: 1,
                cause: DropCause::Expired,
            },
        ],
    );

    let events = lines(&path);
    assert_eq!(events.len(), 2);

    let received = &events[0];
    assert_eq!(received["event"], "receive");
    assert_eq!(received["zone"], "control_zone");
    assert_eq!(received["link"], "forecast_zone->control_zone");
    assert_eq!(received["rule"], 1);
    assert_eq!(received["port"], 9002);
    assert_eq!(received["sim_secs"], 26.25);
    assert_eq!(received["level"], "INFO");

    let dropped = &events[1];
    assert_eq!(dropped["event"], "drop");
    assert_eq!(dropped["outcome"], "expired");
    assert_eq!(dropped["level"], "WARN");
}

#[test]
fn test_log_is_appended_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("control_zone.events.jsonl");

    write_events(&path, vec![EventKind::ListenerStopped]);
    write_events(
        &path,
        vec![EventKind::Refused {
            peer: None,
            reason: RefuseReason::WindowClosed,
        }],
    );

    let events = lines(&path);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "listener_stopped");
    assert_eq!(events[1]["outcome"], "window_closed");
}
