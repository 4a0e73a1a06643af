//! park-reconcile
//!
//! Canonicalization and per-slot reconciliation for the parking ingest core.
//!
//! - Slot labels and statuses are mapped to canonical forms (`canonical`).
//! - Each observation is compared to the last known state of its slot and
//!   turned into a `Decision` (`engine`).
//! - Illegal-detection batches carry no transition semantics; `batch` only
//!   decides whether a batch may replace the stored snapshot.
//!
//! Deterministic, pure logic. No IO, no clock, no locks. Callers own the
//! lookup of prior state and the persistence of decisions.

mod batch;
mod canonical;
mod engine;
mod types;

pub use batch::{BatchOrdering, BatchOutcome};
pub use canonical::{normalize_slot_id, normalize_status, parse_event_timestamp, CanonicalError};
pub use engine::{reconcile, reconcile_with};
pub use types::*;
