//! Scenario: every failure is confined to its own message
//!
//! # Invariants under test
//!
//! 1. Malformed JSON, wrong field types, bad slot labels, bad statuses and
//!    unknown topics are rejected with their own error kind and write nothing.
//! 2. A storage failure drops that message only; the next message for the
//!    same slot applies normally and repairs the state.
//! 3. `dispatch` never propagates an error.
//! 4. Counters account for every message.

use std::sync::Arc;

use park_daemon::IngestError;
use park_db::ParkingStore;
use park_reconcile::{Occupancy, SlotId};
use park_testkit::{ingestor_with, ManualClock, MemStore, StoreOp};
use serde_json::json;

const STATUS: &str = "parking/status";

fn slot(n: i64) -> SlotId {
    SlotId::new(n).unwrap()
}

#[tokio::test]
async fn rejected_messages_write_nothing() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

    let cases: Vec<(&str, Vec<u8>, &str)> = vec![
        (STATUS, b"{\"slot\": ".to_vec(), "invalid_payload"),
        (STATUS, br#"{"status": "occupied"}"#.to_vec(), "invalid_payload"),
        (STATUS, br#"{"slot": 5, "status": "occupied"}"#.to_vec(), "invalid_payload"),
        (STATUS, br#"{"slot": "lobby", "status": "occupied"}"#.to_vec(), "invalid_slot_label"),
        (STATUS, br#"{"slot": "slot0", "status": "occupied"}"#.to_vec(), "invalid_slot_label"),
        (STATUS, br#"{"slot": "slot1", "status": "bad"}"#.to_vec(), "invalid_status"),
        (STATUS, br#"{"slot": "slot1", "status": 2}"#.to_vec(), "invalid_status"),
        (STATUS, br#"{"slot": "slot1", "status": true}"#.to_vec(), "invalid_status"),
        ("parking/other", br#"{"slot": "slot1", "status": 1}"#.to_vec(), "unknown_topic"),
    ];

    for (topic, payload, kind) in &cases {
        let err = ingest.handle(topic, payload).await.unwrap_err();
        assert_eq!(err.kind(), *kind, "{topic} {}", String::from_utf8_lossy(payload));
    }

    assert!(store.operations().is_empty());
    assert_eq!(store.slot_state_count(), 0);

    let stats = ingest.context().stats.snapshot();
    assert_eq!(stats.received, cases.len() as u64);
    assert_eq!(stats.dropped, cases.len() as u64);
}

#[tokio::test]
async fn invalid_status_error_names_the_raw_value() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store, Arc::new(ManualClock::at_epoch()));

    let err = ingest
        .handle(STATUS, br#"{"slot": "slot1", "status": "parked"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidStatus { .. }));
    assert!(err.to_string().contains("parked"));
}

#[tokio::test]
async fn storage_failure_drops_one_message_and_the_next_repairs_state() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));
    let occupied = serde_json::to_vec(&json!({"slot": "slot3", "status": "occupied"})).unwrap();
    let empty = serde_json::to_vec(&json!({"slot": "slot3", "status": "empty"})).unwrap();

    ingest.handle(STATUS, &occupied).await.unwrap();

    store.inject_failure(StoreOp::ApplyDecision { slot: slot(3), kind: "" }, 1);
    let err = ingest.handle(STATUS, &empty).await.unwrap_err();
    assert!(matches!(err, IngestError::Storage(_)));
    assert_eq!(err.kind(), "storage_failure");

    // Stored state is unchanged by the failed write.
    let states = store.load_slot_states().await.unwrap();
    assert_eq!(states[0].status, Occupancy::Occupied);

    // The next message sees the stored prior and applies the transition.
    let out = ingest.handle(STATUS, &empty).await.unwrap();
    assert!(matches!(out, park_daemon::Outcome::Slot(ref d) if d.kind() == "transition"));
    assert_eq!(store.load_changes(slot(3)).await.unwrap().len(), 2);

    let stats = ingest.context().stats.snapshot();
    assert_eq!(stats.storage_failure, 1);
    assert_eq!(stats.first_seen, 1);
    assert_eq!(stats.transitions, 1);
}

#[tokio::test]
async fn failing_slot_does_not_affect_other_slots() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));
    store.fail_slot(slot(6));

    for label in ["slot6", "slot7", "slot6", "slot8"] {
        let payload = serde_json::to_vec(&json!({"slot": label, "status": 1})).unwrap();
        ingest.dispatch(ingest.admit(STATUS, &payload)).await;
    }

    assert!(store.load_first_seen(slot(6)).await.unwrap().is_none());
    assert!(store.load_first_seen(slot(7)).await.unwrap().is_some());
    assert!(store.load_first_seen(slot(8)).await.unwrap().is_some());

    let stats = ingest.context().stats.snapshot();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.storage_failure, 2);
    assert_eq!(stats.first_seen, 2);
}

#[tokio::test]
async fn lookup_failure_is_a_storage_failure() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));
    store.inject_failure(StoreOp::Lookup { slot: slot(1) }, 1);

    let payload = serde_json::to_vec(&json!({"slot": "slot9", "status": 0})).unwrap();
    let err = ingest.handle(STATUS, &payload).await.unwrap_err();
    assert_eq!(err.kind(), "storage_failure");

    ingest.handle(STATUS, &payload).await.unwrap();
    assert_eq!(store.load_changes(slot(9)).await.unwrap().len(), 1);
}
