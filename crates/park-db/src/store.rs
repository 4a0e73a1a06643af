//! Persistence boundary for the ingest pipeline.
//!
//! The reconciler never writes; it hands a [`Decision`] to a [`ParkingStore`],
//! which owns every persisted view. Implementations must apply one decision
//! atomically; callers serialize decisions per slot.

use anyhow::Result;
use chrono::{DateTime, Utc};
use park_reconcile::{
    BatchOrdering, BatchOutcome, Decision, Occupancy, PriorKey, PriorState, SlotId,
};
use park_schemas::Car;
use serde_json::Value;

/// A reconciler decision plus the message context needed to persist it.
#[derive(Debug, Clone)]
pub struct StatusWrite<'a> {
    pub decision: &'a Decision,
    /// Slot label as received.
    pub label: &'a str,
    /// Full payload as received; stored verbatim on first sight.
    pub payload: &'a Value,
    pub topic: &'a str,
    pub now: DateTime<Utc>,
}

/// One illegal-parking detection batch, ready to replace the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct IllegalBatch {
    pub count: u32,
    pub cars: Vec<Car>,
    /// Publisher timestamp, when it could be parsed.
    pub event_ts: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotStateRow {
    pub key: PriorKey,
    pub status: Occupancy,
    pub confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirstSeenRow {
    pub slot: SlotId,
    pub original_label: String,
    pub status: Occupancy,
    pub confidence: Option<f64>,
    pub payload: Value,
    pub topic: String,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    pub slot: SlotId,
    pub status: Occupancy,
    pub confidence: Option<f64>,
    pub changed_at: DateTime<Utc>,
}

/// Stored singleton illegal-batch snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSnapshotRow {
    pub count: u32,
    pub cars: Vec<Car>,
    pub event_ts: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub topic: String,
}

#[async_trait::async_trait]
pub trait ParkingStore: Send + Sync {
    /// Backend name for logs (e.g. `"postgres"`).
    fn backend_name(&self) -> &'static str;

    /// Last known state of `slot`, matching the canonical id or, for rows
    /// written before canonicalization, the original `label`. A canonical
    /// match wins over a legacy one.
    async fn lookup_prior(&self, slot: SlotId, label: &str) -> Result<Option<PriorState>>;

    /// Apply one decision:
    /// - `FirstSeen`: raw first-seen record (insert-once), slot state, change event.
    /// - `Transition`: slot state (rewriting a legacy-keyed row to the canonical key), change event.
    /// - `NoOp`: `updated_at` on the matched row only.
    ///
    /// `updated_at` never moves backwards.
    async fn apply_decision(&self, write: &StatusWrite<'_>) -> Result<()>;

    /// Replace the illegal-batch snapshot, subject to `ordering`.
    async fn apply_batch(&self, batch: &IllegalBatch, ordering: BatchOrdering)
        -> Result<BatchOutcome>;

    /// Current slot states; canonical rows sorted by slot ascending, legacy rows last.
    async fn load_slot_states(&self) -> Result<Vec<SlotStateRow>>;

    async fn load_first_seen(&self, slot: SlotId) -> Result<Option<FirstSeenRow>>;

    /// Change history of `slot`, newest first.
    async fn load_changes(&self, slot: SlotId) -> Result<Vec<ChangeRow>>;

    async fn load_latest_batch(&self) -> Result<Option<BatchSnapshotRow>>;
}
