//! park-testkit
//!
//! Test doubles for the ingest pipeline, plus the cross-crate scenario tests
//! under `tests/`.
//!
//! - [`MemStore`]: in-memory `ParkingStore` with the Postgres store's
//!   semantics, failure injection and artificial latency.
//! - [`ManualClock`]: deterministic time source.
//! - [`ingestor_with`]: an `Ingestor` wired to a store and clock.

mod clock;
mod mem_store;

use std::sync::Arc;

use park_config::IngestSettings;
use park_daemon::{IngestContext, Ingestor};
use park_db::ParkingStore;

pub use clock::ManualClock;
pub use mem_store::{MemStore, StoreOp};

/// An ingestor over `store` and `clock` with default settings.
pub fn ingestor_with(store: Arc<dyn ParkingStore>, clock: Arc<ManualClock>) -> Ingestor {
    ingestor_with_settings(store, clock, IngestSettings::default())
}

pub fn ingestor_with_settings(
    store: Arc<dyn ParkingStore>,
    clock: Arc<ManualClock>,
    settings: IngestSettings,
) -> Ingestor {
    Ingestor::new(Arc::new(IngestContext::with_clock(store, clock, settings)))
}
