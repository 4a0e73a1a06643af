use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How concurrent or out-of-order illegal-detection batches are resolved.
///
/// The snapshot is a singleton that is always replaced wholesale; this only
/// decides whether a given batch is allowed to replace it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOrdering {
    /// Last batch to arrive wins, regardless of its event timestamp.
    #[default]
    ArrivalOrder,
    /// A batch whose event timestamp is older than the stored one is skipped.
    /// Batches without a parseable timestamp always apply.
    RejectStale,
}

impl BatchOrdering {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchOrdering::ArrivalOrder => "arrival_order",
            BatchOrdering::RejectStale => "reject_stale",
        }
    }

    /// Whether a batch stamped `incoming` may overwrite one stamped `stored`.
    pub fn should_overwrite(
        self,
        stored: Option<DateTime<Utc>>,
        incoming: Option<DateTime<Utc>>,
    ) -> bool {
        match (self, stored, incoming) {
            (BatchOrdering::RejectStale, Some(stored), Some(incoming)) => incoming >= stored,
            _ => true,
        }
    }
}

/// Result of applying one batch to the snapshot store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied,
    SkippedStale,
}

impl BatchOutcome {
    pub fn kind(self) -> &'static str {
        match self {
            BatchOutcome::Applied => "batch_applied",
            BatchOutcome::SkippedStale => "batch_skipped_stale",
        }
    }
}
