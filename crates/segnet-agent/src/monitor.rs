//! Event log monitor
//!
//! Reads the JSONL event logs of one or more zones and aggregates them per
//! link. Both ends of a link log under the same `source->destination` name,
//! so accepts and receives of the listener land next to the connects and
//! forwards of the connector.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One line of a zone event log
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogEntry {
    pub zone: String,
    pub event: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub rule: Option<u64>,
    #[serde(default)]
    pub port: Option<u64>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub sim_secs: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LogEntry {
    /// Parse one line; `None` for blank lines and anything that is not a
    /// zone event
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    /// Single-line rendering for `--follow`
    pub fn display_line(&self) -> String {
        let mut line = match self.sim_secs {
            Some(secs) => format!("{secs:>9.3}s [{}] {}", self.zone, self.event),
            None => format!("{:>10} [{}] {}", "-", self.zone, self.event),
        };
        if let Some(outcome) = &self.outcome {
            let _ = write!(line, " ({outcome})");
        }
        if let Some(link) = &self.link {
            let _ = write!(line, " {link}");
        }
        if let Some(port) = self.port {
            let _ = write!(line, ":{port}");
        }
        line
    }
}

/// Counts for one link
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LinkSummary {
    pub accepted: u64,
    pub refused: BTreeMap<String, u64>,
    pub connects: u64,
    pub connect_failures: u64,
    pub unavailable: u64,
    pub retries_exhausted: u64,
    pub received: u64,
    pub forwarded: u64,
    pub delivered: u64,
    pub dropped: BTreeMap<String, u64>,
    pub probes: BTreeMap<String, u64>,
}

impl LinkSummary {
    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn refused_total(&self) -> u64 {
        self.refused.values().sum()
    }
}

/// Aggregate over every line read so far
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Summary {
    pub links: BTreeMap<String, LinkSummary>,
    /// Last lifecycle phase seen per zone
    pub phases: BTreeMap<String, String>,
    pub events: u64,
    /// Lines that were not zone events
    pub skipped: u64,
}

impl Summary {
    pub fn record_line(&mut self, line: &str) -> Option<LogEntry> {
        match LogEntry::parse(line) {
            Some(entry) => {
                self.record(&entry);
                Some(entry)
            }
            None => {
                if !line.trim().is_empty() {
                    self.skipped += 1;
                }
                None
            }
        }
    }

    pub fn record(&mut self, entry: &LogEntry) {
        self.events += 1;
        let outcome = entry.outcome.clone().unwrap_or_else(|| "unknown".to_string());

        if entry.event == "phase" {
            self.phases.insert(entry.zone.clone(), outcome);
            return;
        }
        let Some(link) = &entry.link else {
            return;
        };
        let summary = self.links.entry(link.clone()).or_default();
        match entry.event.as_str() {
            "accept" => summary.accepted += 1,
            "refuse" => *summary.refused.entry(outcome).or_default() += 1,
            "connect" => summary.connects += 1,
            "connect_failed" => summary.connect_failures += 1,
            "unavailable" => summary.unavailable += 1,
            "retries_exhausted" => summary.retries_exhausted += 1,
            "receive" => summary.received += 1,
            "forward" => summary.forwarded += 1,
            "deliver" => summary.delivered += 1,
            "drop" => *summary.dropped.entry(outcome).or_default() += 1,
            "probe" => *summary.probes.entry(outcome).or_default() += 1,
            _ => {}
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} events, {} skipped lines", self.events, self.skipped);

        for (link, s) in &self.links {
            let _ = writeln!(out, "\n{link}");
            let _ = writeln!(
                out,
                "  listener:  accepted {}, refused {}, received {}",
                s.accepted,
                s.refused_total(),
                s.received
            );
            let _ = writeln!(
                out,
                "  connector: connects {}, failures {}, unavailable {}, retries exhausted {}",
                s.connects, s.connect_failures, s.unavailable, s.retries_exhausted
            );
            let _ = writeln!(
                out,
                "  units:     forwarded {}, delivered {}, dropped {}",
                s.forwarded,
                s.delivered,
                s.dropped_total()
            );
            write_counts(&mut out, "refused", &s.refused);
            write_counts(&mut out, "dropped", &s.dropped);
            write_counts(&mut out, "probes", &s.probes);
        }

        if !self.phases.is_empty() {
            let _ = writeln!(out, "\nzones");
            for (zone, phase) in &self.phases {
                let _ = writeln!(out, "  {zone}: {phase}");
            }
        }
        out
    }
}

fn write_counts(out: &mut String, label: &str, counts: &BTreeMap<String, u64>) {
    if counts.is_empty() {
        return;
    }
    let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let _ = writeln!(out, "  {label:<10} {}", parts.join(" "));
}

/// Incremental reader of an append-only log file
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Complete lines appended since the last call
    ///
    /// A missing file reads as empty. A trailing line without its newline
    /// is left for the next call. A file shorter than the last offset was
    /// replaced and is read from the start.
    pub async fn read_new(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buf[..=last_newline];
        self.offset += complete.len() as u64;

        Ok(String::from_utf8_lossy(complete)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Read `logs` once, or keep polling them with `follow` until `cancel`
/// fires. `on_entry` sees every event as it is read.
pub async fn monitor<F>(
    logs: Vec<PathBuf>,
    follow: bool,
    interval: Duration,
    cancel: CancellationToken,
    mut on_entry: F,
) -> Summary
where
    F: FnMut(&LogEntry),
{
    let mut tails: Vec<LogTail> = logs.into_iter().map(LogTail::new).collect();
    let mut summary = Summary::default();

    loop {
        for tail in &mut tails {
            match tail.read_new().await {
                Ok(lines) => {
                    for line in lines {
                        if let Some(entry) = summary.record_line(&line) {
                            on_entry(&entry);
                        }
                    }
                }
                Err(e) => warn!(path = %tail.path.display(), error = %e, "cannot read event log"),
            }
        }

        if !follow {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const LINES: &str = concat!(
        r#"{"timestamp":"2026-10-14T08:00:05Z","level":"WARN","message":"refused 127.0.0.1:5000: window_closed","zone":"forecast_zone","rule":0,"link":"data_ingestion_zone->forecast_zone","port":9001,"event":"refuse","outcome":"window_closed","sim_secs":4.9}"#,
        "\n",
        r#"{"timestamp":"2026-10-14T08:00:05Z","level":"INFO","message":"connected on attempt 2","zone":"data_ingestion_zone","rule":0,"link":"data_ingestion_zone->forecast_zone","port":9001,"event":"connect","sim_secs":5.1}"#,
        "\n",
        r#"{"timestamp":"2026-10-14T08:00:05Z","level":"INFO","message":"forwarded #0 (12 bytes)","zone":"data_ingestion_zone","rule":0,"link":"data_ingestion_zone->forecast_zone","port":9001,"event":"forward","sim_secs":5.2}"#,
        "\n",
        "not json\n",
        r#"{"timestamp":"2026-10-14T08:00:16Z","level":"WARN","message":"dropped #3: expired","zone":"forecast_zone","rule":1,"link":"forecast_zone->control_zone","event":"drop","outcome":"expired","sim_secs":30.0}"#,
        "\n",
        r#"{"timestamp":"2026-10-14T08:00:16Z","level":"INFO","message":"agent draining","zone":"forecast_zone","event":"phase","outcome":"draining","sim_secs":55.0}"#,
        "\n",
    );

    #[test]
    fn test_summary_per_link() {
        let mut summary = Summary::default();
        for line in LINES.lines() {
            summary.record_line(line);
        }

        assert_eq!(summary.events, 5);
        assert_eq!(summary.skipped, 1);

        let first = &summary.links["data_ingestion_zone->forecast_zone"];
        assert_eq!(first.refused["window_closed"], 1);
        assert_eq!(first.connects, 1);
        assert_eq!(first.forwarded, 1);

        let second = &summary.links["forecast_zone->control_zone"];
        assert_eq!(second.dropped["expired"], 1);
        assert_eq!(summary.phases["forecast_zone"], "draining");

        let rendered = summary.render();
        assert!(rendered.contains("data_ingestion_zone->forecast_zone"));
        assert!(rendered.contains("expired=1"));
    }

    #[test]
    fn test_display_line() {
        let entry = LogEntry::parse(LINES.lines().next().unwrap()).unwrap();
        assert_eq!(
            entry.display_line(),
            "    4.900s [forecast_zone] refuse (window_closed) data_ingestion_zone->forecast_zone:9001"
        );
    }

    #[tokio::test]
    async fn test_tail_reads_only_complete_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.events.jsonl");
        let mut tail = LogTail::new(&path);
        assert!(tail.read_new().await.unwrap().is_empty());

        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "one\ntwo\nthr").unwrap();
        file.flush().unwrap();
        assert_eq!(tail.read_new().await.unwrap(), ["one", "two"]);

        writeln!(file, "ee").unwrap();
        file.flush().unwrap();
        assert_eq!(tail.read_new().await.unwrap(), ["three"]);
        assert!(tail.read_new().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_monitor_reads_every_log_once() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a.jsonl"), dir.path().join("b.jsonl"));
        let lines: Vec<&str> = LINES.lines().collect();
        std::fs::write(&a, format!("{}\n{}\n", lines[0], lines[1])).unwrap();
        std::fs::write(&b, format!("{}\n", lines[2])).unwrap();

        let mut seen = 0;
        let summary = monitor(
            vec![a, b],
            false,
            Duration::from_millis(10),
            CancellationToken::new(),
            |_| seen += 1,
        )
        .await;
        assert_eq!(seen, 3);
        assert_eq!(summary.links.len(), 1);
    }
}
