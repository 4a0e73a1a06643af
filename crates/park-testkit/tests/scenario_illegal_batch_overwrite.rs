//! Scenario: the illegal-parking snapshot is a replaced singleton
//!
//! # Invariants under test
//!
//! 1. Batch A (count=2) then batch B (count=0, no cars) leaves exactly one
//!    snapshot equal to B; none of A's cars survive.
//! 2. Missing or non-array `cars` is accepted as an empty list.
//! 3. `arrival_order`: an out-of-order older batch still overwrites.
//! 4. `reject_stale`: an older batch is skipped; undated batches always apply.
//! 5. Batches handed to tasks back to back are written in arrival order,
//!    even when the later one is far cheaper to decode.
//! 6. A malformed batch is dropped and leaves the snapshot untouched.

use std::sync::Arc;

use park_daemon::{IngestError, Outcome};
use park_db::ParkingStore;
use park_reconcile::{BatchOrdering, BatchOutcome};
use park_config::IngestSettings;
use park_testkit::{ingestor_with, ingestor_with_settings, ManualClock, MemStore, StoreOp};
use serde_json::{json, Value};

const ILLEGAL: &str = "parking/illegal";

fn bytes(v: Value) -> Vec<u8> {
    serde_json::to_vec(&v).unwrap()
}

fn with_ordering(ordering: BatchOrdering) -> IngestSettings {
    let mut s = IngestSettings::default();
    s.ingest.illegal_ordering = ordering;
    s
}

#[tokio::test]
async fn newer_batch_replaces_the_snapshot_wholesale() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

    let a = json!({
        "timestamp": "2025-01-01T00:00:10Z",
        "count": 2,
        "cars": [
            {"id": 1, "x": 10.5, "y": 3.0, "duration": 120.0, "msg": "fire lane"},
            {"id": "b", "x": 44.0, "y": 9.5}
        ]
    });
    let b = json!({"timestamp": "2025-01-01T00:00:20Z", "count": 0, "cars": []});

    assert_eq!(
        ingest.handle(ILLEGAL, &bytes(a)).await.unwrap(),
        Outcome::Batch(BatchOutcome::Applied)
    );
    let snap = store.load_latest_batch().await.unwrap().unwrap();
    assert_eq!(snap.count, 2);
    assert_eq!(snap.cars.len(), 2);
    assert_eq!(snap.cars[0].msg.as_deref(), Some("fire lane"));

    ingest.handle(ILLEGAL, &bytes(b)).await.unwrap();
    let snap = store.load_latest_batch().await.unwrap().unwrap();
    assert_eq!(snap.count, 0);
    assert!(snap.cars.is_empty());
    assert_eq!(snap.topic, ILLEGAL);
}

#[tokio::test]
async fn missing_or_malformed_cars_mean_no_cars() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

    for msg in [
        json!({"count": 3}),
        json!({"count": 3, "cars": "not a list"}),
        json!({"count": 3, "cars": null}),
    ] {
        ingest.handle(ILLEGAL, &bytes(msg)).await.unwrap();
        let snap = store.load_latest_batch().await.unwrap().unwrap();
        assert_eq!(snap.count, 3);
        assert!(snap.cars.is_empty());
    }

    // Non-object entries are dropped, the rest kept in order.
    ingest
        .handle(
            ILLEGAL,
            &bytes(json!({"count": 2, "cars": [{"x": 1.0}, 7, {"x": 2.0}]})),
        )
        .await
        .unwrap();
    let snap = store.load_latest_batch().await.unwrap().unwrap();
    let xs: Vec<Option<f64>> = snap.cars.iter().map(|c| c.x).collect();
    assert_eq!(xs, [Some(1.0), Some(2.0)]);
}

#[tokio::test]
async fn arrival_order_applies_an_older_batch_last() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with_settings(
        store.clone(),
        Arc::new(ManualClock::at_epoch()),
        with_ordering(BatchOrdering::ArrivalOrder),
    );

    ingest
        .handle(ILLEGAL, &bytes(json!({"timestamp": 1_735_689_620, "count": 5})))
        .await
        .unwrap();
    let out = ingest
        .handle(ILLEGAL, &bytes(json!({"timestamp": 1_735_689_610, "count": 1})))
        .await
        .unwrap();

    assert_eq!(out, Outcome::Batch(BatchOutcome::Applied));
    assert_eq!(store.load_latest_batch().await.unwrap().unwrap().count, 1);
}

#[tokio::test]
async fn reject_stale_skips_an_older_batch() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with_settings(
        store.clone(),
        Arc::new(ManualClock::at_epoch()),
        with_ordering(BatchOrdering::RejectStale),
    );

    ingest
        .handle(ILLEGAL, &bytes(json!({"timestamp": "2025-01-01T00:00:20Z", "count": 5})))
        .await
        .unwrap();
    let out = ingest
        .handle(ILLEGAL, &bytes(json!({"timestamp": "2025-01-01T00:00:10Z", "count": 1})))
        .await
        .unwrap();
    assert_eq!(out, Outcome::Batch(BatchOutcome::SkippedStale));
    assert_eq!(store.load_latest_batch().await.unwrap().unwrap().count, 5);

    // Undated batch always applies.
    let out = ingest
        .handle(ILLEGAL, &bytes(json!({"count": 0, "cars": []})))
        .await
        .unwrap();
    assert_eq!(out, Outcome::Batch(BatchOutcome::Applied));
    assert_eq!(store.load_latest_batch().await.unwrap().unwrap().count, 0);

    let stats = ingest.context().stats.snapshot();
    assert_eq!(stats.batches_applied, 2);
    assert_eq!(stats.batches_skipped, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_to_back_batches_leave_the_last_arrival() {
    // A large batch followed at once by a small one: the small one decodes
    // first but must still be written last.
    let cars: Vec<Value> = (0..20_000)
        .map(|i| json!({"id": i, "x": 1.5, "y": 2.5, "duration": 30.0, "msg": "bus stop"}))
        .collect();
    let large = bytes(json!({"count": 7, "cars": cars}));
    let small = bytes(json!({"count": 0}));

    for _ in 0..5 {
        let store = Arc::new(MemStore::new());
        let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

        // Admitted in arrival order, then handed to tasks with no pause.
        let first = ingest.admit(ILLEGAL, &large);
        let second = ingest.admit(ILLEGAL, &small);
        let a = tokio::spawn({
            let ingest = ingest.clone();
            async move { ingest.process(first).await }
        });
        let b = tokio::spawn({
            let ingest = ingest.clone();
            async move { ingest.process(second).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let counts: Vec<u32> = store
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::ApplyBatch { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, [7, 0]);
        let snap = store.load_latest_batch().await.unwrap().unwrap();
        assert_eq!(snap.count, 0);
        assert!(snap.cars.is_empty());
        assert_eq!(ingest.context().illegal_lane.active(), 0);
    }
}

#[tokio::test]
async fn malformed_batch_is_dropped() {
    let store = Arc::new(MemStore::new());
    let ingest = ingestor_with(store.clone(), Arc::new(ManualClock::at_epoch()));

    ingest
        .handle(ILLEGAL, &bytes(json!({"count": 4})))
        .await
        .unwrap();

    for bad in [
        b"{not json".to_vec(),
        bytes(json!({"cars": []})),
        bytes(json!({"count": -1})),
        bytes(json!({"count": "two"})),
    ] {
        let err = ingest.handle(ILLEGAL, &bad).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidPayload { .. }), "{err}");
    }

    assert_eq!(store.load_latest_batch().await.unwrap().unwrap().count, 4);
}
