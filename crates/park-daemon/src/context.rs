//! Live handles shared by the listener and every message task.
//!
//! Built once at startup and passed around as `Arc<IngestContext>`; there is
//! no process-global connection state.

use std::sync::Arc;

use park_config::IngestSettings;
use park_db::ParkingStore;

use crate::clock::{Clock, SystemClock};
use crate::locks::{ArrivalLocks, SlotLocks};
use crate::stats::IngestStats;

pub struct IngestContext {
    pub store: Arc<dyn ParkingStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: IngestSettings,
    pub slot_locks: SlotLocks,
    /// Single lane for the illegal topic; snapshot writes run in arrival order.
    pub illegal_lane: ArrivalLocks<()>,
    pub stats: IngestStats,
}

impl IngestContext {
    pub fn new(store: Arc<dyn ParkingStore>, settings: IngestSettings) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), settings)
    }

    pub fn with_clock(
        store: Arc<dyn ParkingStore>,
        clock: Arc<dyn Clock>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
            slot_locks: SlotLocks::new(),
            illegal_lane: ArrivalLocks::new(),
            stats: IngestStats::default(),
        }
    }
}

impl std::fmt::Debug for IngestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestContext")
            .field("store", &self.store.backend_name())
            .field("settings", &self.settings)
            .field("active_slots", &self.slot_locks.active())
            .finish_non_exhaustive()
    }
}
