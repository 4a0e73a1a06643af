use serde::{Deserialize, Serialize};

/// Canonical slot identifier: the positive integer extracted from any label
/// variant (`"slot1"`, `"slot 01"` and `"1"` are all slot 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(i64);

impl SlotId {
    /// `None` unless `n > 0`.
    pub fn new(n: i64) -> Option<Self> {
        (n > 0).then_some(Self(n))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Occupancy status of a slot. Persisted as 0/1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Occupancy {
    Empty,
    Occupied,
}

impl Occupancy {
    pub fn as_i16(self) -> i16 {
        match self {
            Occupancy::Empty => 0,
            Occupancy::Occupied => 1,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Occupancy::Empty),
            1 => Some(Occupancy::Occupied),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Occupancy::Empty => "empty",
            Occupancy::Occupied => "occupied",
        }
    }
}

/// Key of the stored SlotState record that matched a lookup.
///
/// Records written before canonicalization existed are keyed by the label
/// string they arrived with. A lookup matching either key refers to the same
/// slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PriorKey {
    Canonical(SlotId),
    Legacy(String),
}

impl PriorKey {
    /// Dual-key match rule for a record with this key against an incoming
    /// observation of `slot` published under `label`.
    pub fn matches(&self, slot: SlotId, label: &str) -> bool {
        match self {
            PriorKey::Canonical(id) => *id == slot,
            PriorKey::Legacy(stored) => stored == label,
        }
    }
}

/// Last known state of a slot, as returned by the store lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorState {
    pub status: Occupancy,
    pub key: PriorKey,
}

/// A canonicalized status observation for one slot.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotObservation {
    pub slot: SlotId,
    /// Label exactly as received; used for the legacy half of the lookup.
    pub label: String,
    pub status: Occupancy,
    pub confidence: Option<f64>,
}

/// What the persistence layer must do with an observation.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Status unchanged. Refresh `updated_at` on the matched record only.
    NoOp { slot: SlotId, key: PriorKey },
    /// No record for this slot yet: write the raw first-seen record, the
    /// slot state and a change event.
    FirstSeen {
        slot: SlotId,
        status: Occupancy,
        confidence: Option<f64>,
    },
    /// Status differs from the stored one: write slot state and a change
    /// event. `replaces` names the record being superseded.
    Transition {
        slot: SlotId,
        status: Occupancy,
        confidence: Option<f64>,
        replaces: PriorKey,
    },
}

impl Decision {
    pub fn slot(&self) -> SlotId {
        match self {
            Decision::NoOp { slot, .. }
            | Decision::FirstSeen { slot, .. }
            | Decision::Transition { slot, .. } => *slot,
        }
    }

    /// `true` when this decision appends to the change history.
    pub fn records_change(&self) -> bool {
        !matches!(self, Decision::NoOp { .. })
    }

    /// Stable tag for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::NoOp { .. } => "noop",
            Decision::FirstSeen { .. } => "first_seen",
            Decision::Transition { .. } => "transition",
        }
    }

    /// Phase of the slot after this decision is applied on top of `current`.
    pub fn next_phase(&self, current: SlotPhase) -> SlotPhase {
        match self {
            Decision::NoOp { .. } => current,
            Decision::FirstSeen { status, .. } | Decision::Transition { status, .. } => {
                SlotPhase::from(*status)
            }
        }
    }
}

/// Per-slot state machine: `Unknown` until the first observation, then
/// alternating between `Occupied` and `Empty`. There is no terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotPhase {
    #[default]
    Unknown,
    Occupied,
    Empty,
}

impl From<Occupancy> for SlotPhase {
    fn from(o: Occupancy) -> Self {
        match o {
            Occupancy::Empty => SlotPhase::Empty,
            Occupancy::Occupied => SlotPhase::Occupied,
        }
    }
}
