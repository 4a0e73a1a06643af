//! In-memory [`ParkingStore`].
//!
//! Mirrors `PgStore`: canonical-over-legacy lookup, insert-once raw records,
//! monotonic `updated_at`, legacy re-keying on transition, and the
//! stale-batch guard. Every call is recorded so tests can assert on the
//! exact store traffic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use park_db::{
    BatchSnapshotRow, ChangeRow, FirstSeenRow, IllegalBatch, ParkingStore, SlotStateRow,
    StatusWrite,
};
use park_reconcile::{
    BatchOrdering, BatchOutcome, Decision, Occupancy, PriorKey, PriorState, SlotId,
};

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Lookup { slot: SlotId },
    ApplyDecision { slot: SlotId, kind: &'static str },
    ApplyBatch { count: u32 },
}

impl StoreOp {
    fn matches_kind(&self, other: &StoreOp) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone)]
struct StateRow {
    status: Occupancy,
    confidence: Option<f64>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    canonical: BTreeMap<SlotId, StateRow>,
    legacy: BTreeMap<String, StateRow>,
    first_seen: HashMap<SlotId, FirstSeenRow>,
    /// Append order is commit order.
    changes: Vec<ChangeRow>,
    batch: Option<BatchSnapshotRow>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Op kind → remaining failures.
    next: Vec<(StoreOp, usize)>,
    /// Slots whose decisions always fail.
    slots: Vec<SlotId>,
}

#[derive(Debug, Clone, Default)]
pub struct MemStore {
    tables: Arc<Mutex<Tables>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    faults: Arc<Mutex<Faults>>,
    lookup_latency: Option<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` after each lookup returns, widening the window
    /// between read and write.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            lookup_latency: Some(latency),
            ..Self::default()
        }
    }

    /// Fail the next `times` calls of the same kind as `op` (fields ignored).
    pub fn inject_failure(&self, op: StoreOp, times: usize) {
        lock(&self.faults).next.push((op, times));
    }

    /// Fail every `apply_decision` for `slot`.
    pub fn fail_slot(&self, slot: SlotId) {
        lock(&self.faults).slots.push(slot);
    }

    /// Seed a row keyed by its raw label, as written before canonical ids.
    pub fn insert_legacy_row(&self, label: &str, status: Occupancy, updated_at: DateTime<Utc>) {
        lock(&self.tables).legacy.insert(
            label.to_string(),
            StateRow {
                status,
                confidence: None,
                updated_at,
            },
        );
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        lock(&self.operations).clone()
    }

    /// All change events in commit order, oldest first.
    pub fn all_changes(&self) -> Vec<ChangeRow> {
        lock(&self.tables).changes.clone()
    }

    pub fn first_seen_count(&self) -> usize {
        lock(&self.tables).first_seen.len()
    }

    pub fn slot_state_count(&self) -> usize {
        let t = lock(&self.tables);
        t.canonical.len() + t.legacy.len()
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        {
            let mut faults = lock(&self.faults);
            if let Some(entry) = faults
                .next
                .iter_mut()
                .find(|(kind, left)| *left > 0 && kind.matches_kind(&op))
            {
                entry.1 -= 1;
                lock(&self.operations).push(op.clone());
                bail!("injected failure: {op:?}");
            }
            if let StoreOp::ApplyDecision { slot, .. } = &op {
                if faults.slots.contains(slot) {
                    lock(&self.operations).push(op.clone());
                    bail!("injected failure for slot {slot}");
                }
            }
        }
        lock(&self.operations).push(op);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ParkingStore for MemStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn lookup_prior(&self, slot: SlotId, label: &str) -> Result<Option<PriorState>> {
        self.record(StoreOp::Lookup { slot })?;

        let found = {
            let t = lock(&self.tables);
            t.canonical
                .get(&slot)
                .map(|r| PriorState {
                    status: r.status,
                    key: PriorKey::Canonical(slot),
                })
                .or_else(|| {
                    t.legacy.get(label).map(|r| PriorState {
                        status: r.status,
                        key: PriorKey::Legacy(label.to_string()),
                    })
                })
        };

        if let Some(d) = self.lookup_latency {
            tokio::time::sleep(d).await;
        }
        Ok(found)
    }

    async fn apply_decision(&self, write: &StatusWrite<'_>) -> Result<()> {
        let decision = write.decision;
        self.record(StoreOp::ApplyDecision {
            slot: decision.slot(),
            kind: decision.kind(),
        })?;

        let mut t = lock(&self.tables);
        let now = write.now;

        match decision {
            Decision::FirstSeen {
                slot,
                status,
                confidence,
            } => {
                t.first_seen.entry(*slot).or_insert_with(|| FirstSeenRow {
                    slot: *slot,
                    original_label: write.label.to_string(),
                    status: *status,
                    confidence: *confidence,
                    payload: write.payload.clone(),
                    topic: write.topic.to_string(),
                    first_seen_at: now,
                });
                upsert(&mut t.canonical, *slot, *status, *confidence, now);
                push_change(&mut t.changes, *slot, *status, *confidence, now);
            }

            Decision::Transition {
                slot,
                status,
                confidence,
                replaces,
            } => {
                let legacy = match replaces {
                    PriorKey::Legacy(label) => t.legacy.remove(label),
                    PriorKey::Canonical(_) => None,
                };
                if let Some(old) = legacy {
                    if !t.canonical.contains_key(slot) {
                        t.canonical.insert(*slot, old);
                    }
                }
                upsert(&mut t.canonical, *slot, *status, *confidence, now);
                push_change(&mut t.changes, *slot, *status, *confidence, now);
            }

            Decision::NoOp { key, .. } => {
                let row = match key {
                    PriorKey::Canonical(slot) => t.canonical.get_mut(slot),
                    PriorKey::Legacy(label) => t.legacy.get_mut(label),
                };
                let row = row.ok_or_else(|| anyhow!("touch matched no row for {key:?}"))?;
                row.updated_at = row.updated_at.max(now);
            }
        }
        Ok(())
    }

    async fn apply_batch(
        &self,
        batch: &IllegalBatch,
        ordering: BatchOrdering,
    ) -> Result<BatchOutcome> {
        self.record(StoreOp::ApplyBatch { count: batch.count })?;

        let mut t = lock(&self.tables);
        let stored_ts = t.batch.as_ref().and_then(|b| b.event_ts);
        if t.batch.is_some() && !ordering.should_overwrite(stored_ts, batch.event_ts) {
            return Ok(BatchOutcome::SkippedStale);
        }
        t.batch = Some(BatchSnapshotRow {
            count: batch.count,
            cars: batch.cars.clone(),
            event_ts: batch.event_ts,
            received_at: batch.received_at,
            topic: batch.topic.clone(),
        });
        Ok(BatchOutcome::Applied)
    }

    async fn load_slot_states(&self) -> Result<Vec<SlotStateRow>> {
        let t = lock(&self.tables);
        let canonical = t.canonical.iter().map(|(slot, r)| SlotStateRow {
            key: PriorKey::Canonical(*slot),
            status: r.status,
            confidence: r.confidence,
            updated_at: r.updated_at,
        });
        let legacy = t.legacy.iter().map(|(label, r)| SlotStateRow {
            key: PriorKey::Legacy(label.clone()),
            status: r.status,
            confidence: r.confidence,
            updated_at: r.updated_at,
        });
        Ok(canonical.chain(legacy).collect())
    }

    async fn load_first_seen(&self, slot: SlotId) -> Result<Option<FirstSeenRow>> {
        Ok(lock(&self.tables).first_seen.get(&slot).cloned())
    }

    async fn load_changes(&self, slot: SlotId) -> Result<Vec<ChangeRow>> {
        let t = lock(&self.tables);
        Ok(t.changes
            .iter()
            .rev()
            .filter(|c| c.slot == slot)
            .cloned()
            .collect())
    }

    async fn load_latest_batch(&self) -> Result<Option<BatchSnapshotRow>> {
        Ok(lock(&self.tables).batch.clone())
    }
}

fn upsert(
    rows: &mut BTreeMap<SlotId, StateRow>,
    slot: SlotId,
    status: Occupancy,
    confidence: Option<f64>,
    now: DateTime<Utc>,
) {
    let row = rows.entry(slot).or_insert(StateRow {
        status,
        confidence,
        updated_at: now,
    });
    row.status = status;
    row.confidence = confidence;
    row.updated_at = row.updated_at.max(now);
}

fn push_change(
    changes: &mut Vec<ChangeRow>,
    slot: SlotId,
    status: Occupancy,
    confidence: Option<f64>,
    changed_at: DateTime<Utc>,
) {
    changes.push(ChangeRow {
        slot,
        status,
        confidence,
        changed_at,
    });
}
