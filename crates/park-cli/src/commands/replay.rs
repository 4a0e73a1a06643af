//! Offline replay of captured bus payloads.
//!
//! Input is JSON lines: one message payload per line, blank lines and lines
//! starting with `#` ignored. Every payload goes through the same
//! `Ingestor::handle` as live traffic, one at a time in file order.

use std::collections::BTreeMap;

use park_daemon::{Ingestor, Outcome};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub lines: usize,
    pub applied: usize,
    /// Decision or batch outcome → count.
    pub outcomes: BTreeMap<String, usize>,
    /// Error kind → count.
    pub dropped: BTreeMap<String, usize>,
}

pub async fn replay_lines(ingestor: &Ingestor, topic: &str, text: &str) -> ReplayReport {
    let mut report = ReplayReport::default();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        report.lines += 1;

        match ingestor.handle(topic, line.as_bytes()).await {
            Ok(outcome) => {
                report.applied += 1;
                let tag = match &outcome {
                    Outcome::Slot(d) => d.kind(),
                    Outcome::Batch(o) => o.kind(),
                };
                *report.outcomes.entry(tag.to_string()).or_default() += 1;
            }
            Err(e) => {
                warn!(line = idx + 1, error.kind = e.kind(), error = %e, "replay line dropped");
                *report.dropped.entry(e.kind().to_string()).or_default() += 1;
            }
        }
    }
    report
}
