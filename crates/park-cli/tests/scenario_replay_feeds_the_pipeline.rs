//! Scenario: replaying a capture through the ingest pipeline
//!
//! # Invariants under test
//!
//! 1. Lines are applied in file order; comments and blank lines are skipped.
//! 2. Bad lines are counted by error kind and do not stop the replay.
//! 3. Replaying the same capture again records only real status flips.

use std::sync::Arc;

use park_cli::commands::replay::replay_lines;
use park_db::ParkingStore;
use park_reconcile::SlotId;
use park_testkit::{ingestor_with, ManualClock, MemStore};

const CAPTURE: &str = r#"
# lot A, morning
{"slot": "slot1", "status": "occupied", "confidence": 0.9}
{"slot": "slot2", "status": 0}
{"slot": "slot1", "status": "occupied"}

{"slot": "slot1", "status": "empty"}
{"slot": "lobby", "status": "empty"}
{"slot": "slot2", "status": "maybe"}
not json at all
"#;

#[tokio::test]
async fn capture_is_applied_in_order_and_bad_lines_are_counted() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

    let report = replay_lines(&ingest, "parking/status", CAPTURE).await;

    assert_eq!(report.lines, 7);
    assert_eq!(report.applied, 4);
    assert_eq!(report.outcomes.get("first_seen"), Some(&2));
    assert_eq!(report.outcomes.get("noop"), Some(&1));
    assert_eq!(report.outcomes.get("transition"), Some(&1));
    assert_eq!(report.dropped.get("invalid_slot_label"), Some(&1));
    assert_eq!(report.dropped.get("invalid_status"), Some(&1));
    assert_eq!(report.dropped.get("invalid_payload"), Some(&1));

    let slot1 = SlotId::new(1).unwrap();
    assert_eq!(store.load_changes(slot1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn replaying_again_records_only_real_flips() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

    replay_lines(&ingest, "parking/status", CAPTURE).await;
    let before = store.all_changes().len();

    let again = replay_lines(&ingest, "parking/status", CAPTURE).await;
    // slot1 ends empty, so its first line flips it back: one transition, then
    // the rest repeat known states.
    assert_eq!(again.outcomes.get("first_seen"), None);
    assert_eq!(store.all_changes().len(), before + 2);
}
