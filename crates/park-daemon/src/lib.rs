//! park-daemon library target.
//!
//! The ingest core behind the `park-daemon` binary:
//! - `context`: live handles shared by every message task
//! - `locks`: per-key turns in arrival order for lookup → reconcile → write
//! - `ingest`: topic routing and the per-message pipeline
//! - `listener`: MQTT connection, subscriptions, reconnect, shutdown drain
//!
//! Exposed as a library for the CLI replay command and the scenario tests.

pub mod bootstrap;
pub mod clock;
pub mod context;
pub mod error;
pub mod ingest;
pub mod listener;
pub mod locks;
pub mod stats;

pub use clock::{Clock, SystemClock};
pub use context::IngestContext;
pub use error::IngestError;
pub use ingest::{Admitted, Ingestor, Outcome};
pub use listener::{backoff_delay, mqtt_options, BusListener};
pub use locks::{ArrivalLocks, SlotLocks, Ticket, Turn};
pub use stats::{IngestStats, StatsSnapshot};
