use std::sync::atomic::{AtomicU64, Ordering};

use park_reconcile::{BatchOutcome, Decision};
use serde::Serialize;

use crate::error::IngestError;

/// Process-lifetime ingest counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    first_seen: AtomicU64,
    transitions: AtomicU64,
    noops: AtomicU64,
    batches_applied: AtomicU64,
    batches_skipped: AtomicU64,
    invalid_payload: AtomicU64,
    invalid_slot_label: AtomicU64,
    invalid_status: AtomicU64,
    unknown_topic: AtomicU64,
    storage_failure: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`], for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub first_seen: u64,
    pub transitions: u64,
    pub noops: u64,
    pub batches_applied: u64,
    pub batches_skipped: u64,
    pub dropped: u64,
    pub storage_failure: u64,
}

impl IngestStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, d: &Decision) {
        let c = match d {
            Decision::FirstSeen { .. } => &self.first_seen,
            Decision::Transition { .. } => &self.transitions,
            Decision::NoOp { .. } => &self.noops,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, outcome: BatchOutcome) {
        let c = match outcome {
            BatchOutcome::Applied => &self.batches_applied,
            BatchOutcome::SkippedStale => &self.batches_skipped,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, e: &IngestError) {
        let c = match e {
            IngestError::InvalidPayload { .. } => &self.invalid_payload,
            IngestError::InvalidSlotLabel { .. } => &self.invalid_slot_label,
            IngestError::InvalidStatus { .. } => &self.invalid_status,
            IngestError::UnknownTopic(_) => &self.unknown_topic,
            IngestError::Storage(_) => &self.storage_failure,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let storage_failure = get(&self.storage_failure);
        StatsSnapshot {
            received: get(&self.received),
            first_seen: get(&self.first_seen),
            transitions: get(&self.transitions),
            noops: get(&self.noops),
            batches_applied: get(&self.batches_applied),
            batches_skipped: get(&self.batches_skipped),
            dropped: get(&self.invalid_payload)
                + get(&self.invalid_slot_label)
                + get(&self.invalid_status)
                + get(&self.unknown_topic)
                + storage_failure,
            storage_failure,
        }
    }
}
