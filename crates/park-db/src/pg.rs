//! Postgres-backed [`ParkingStore`].
//!
//! Each decision runs in its own transaction. Uses sqlx `query()` + binds
//! (no compile-time macros) so the crate builds without a live database.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use park_reconcile::{
    BatchOrdering, BatchOutcome, Decision, Occupancy, PriorKey, PriorState, SlotId,
};
use park_schemas::Car;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

use crate::store::{
    BatchSnapshotRow, ChangeRow, FirstSeenRow, IllegalBatch, ParkingStore, SlotStateRow,
    StatusWrite,
};

/// Fixed key of the singleton illegal-batch row.
pub const ILLEGAL_SNAPSHOT_KEY: &str = "latest";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ParkingStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn lookup_prior(&self, slot: SlotId, label: &str) -> Result<Option<PriorState>> {
        let row = sqlx::query(
            r#"
            select slot, legacy_label, status
            from slot_latest
            where slot = $1
               or (slot is null and legacy_label = $2)
            order by slot nulls last
            limit 1
            "#,
        )
        .bind(slot.get())
        .bind(label)
        .fetch_optional(&self.pool)
        .await
        .context("lookup_prior failed")?;

        row.map(|r| -> Result<PriorState> {
            Ok(PriorState {
                key: key_from_row(&r)?,
                status: status_from_row(&r, "status")?,
            })
        })
        .transpose()
    }

    async fn apply_decision(&self, write: &StatusWrite<'_>) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("apply_decision begin failed")?;

        match write.decision {
            Decision::FirstSeen {
                slot,
                status,
                confidence,
            } => {
                sqlx::query(
                    r#"
                    insert into raw_first_seen (
                      slot, original_label, status, confidence, payload, topic, first_seen_at
                    ) values (
                      $1, $2, $3, $4, $5, $6, $7
                    )
                    on conflict (slot) do nothing
                    "#,
                )
                .bind(slot.get())
                .bind(write.label)
                .bind(status.as_i16())
                .bind(*confidence)
                .bind(Json(write.payload))
                .bind(write.topic)
                .bind(write.now)
                .execute(&mut *tx)
                .await
                .context("insert raw_first_seen failed")?;

                upsert_slot_state(&mut tx, *slot, *status, *confidence, write.now).await?;
                insert_change(&mut tx, *slot, *status, *confidence, write.now).await?;
            }

            Decision::Transition {
                slot,
                status,
                confidence,
                replaces,
            } => {
                let rekeyed = match replaces {
                    PriorKey::Legacy(label) => {
                        rekey_legacy_row(&mut tx, label, *slot, *status, *confidence, write.now)
                            .await?
                    }
                    PriorKey::Canonical(_) => false,
                };
                if !rekeyed {
                    upsert_slot_state(&mut tx, *slot, *status, *confidence, write.now).await?;
                }
                insert_change(&mut tx, *slot, *status, *confidence, write.now).await?;
            }

            Decision::NoOp { key, .. } => {
                let res = match key {
                    PriorKey::Canonical(slot) => sqlx::query(
                        r#"
                        update slot_latest
                        set updated_at = greatest(updated_at, $2)
                        where slot = $1
                        "#,
                    )
                    .bind(slot.get())
                    .bind(write.now)
                    .execute(&mut *tx)
                    .await,
                    PriorKey::Legacy(label) => sqlx::query(
                        r#"
                        update slot_latest
                        set updated_at = greatest(updated_at, $2)
                        where slot is null and legacy_label = $1
                        "#,
                    )
                    .bind(label)
                    .bind(write.now)
                    .execute(&mut *tx)
                    .await,
                };
                let res = res.context("touch slot_latest failed")?;
                if res.rows_affected() == 0 {
                    return Err(anyhow!("touch slot_latest matched no row for {key:?}"));
                }
            }
        }

        tx.commit().await.context("apply_decision commit failed")?;
        Ok(())
    }

    async fn apply_batch(
        &self,
        batch: &IllegalBatch,
        ordering: BatchOrdering,
    ) -> Result<BatchOutcome> {
        let count = i32::try_from(batch.count)
            .with_context(|| format!("illegal batch count out of range: {}", batch.count))?;

        // The stale guard lives in the upsert itself so the comparison and the
        // overwrite cannot interleave with another writer.
        let sql = match ordering {
            BatchOrdering::ArrivalOrder => {
                r#"
                insert into illegal_latest (
                  snapshot_key, car_count, cars, event_ts, received_at, topic
                ) values (
                  $1, $2, $3, $4, $5, $6
                )
                on conflict (snapshot_key) do update
                set car_count   = excluded.car_count,
                    cars        = excluded.cars,
                    event_ts    = excluded.event_ts,
                    received_at = excluded.received_at,
                    topic       = excluded.topic
                "#
            }
            BatchOrdering::RejectStale => {
                r#"
                insert into illegal_latest (
                  snapshot_key, car_count, cars, event_ts, received_at, topic
                ) values (
                  $1, $2, $3, $4, $5, $6
                )
                on conflict (snapshot_key) do update
                set car_count   = excluded.car_count,
                    cars        = excluded.cars,
                    event_ts    = excluded.event_ts,
                    received_at = excluded.received_at,
                    topic       = excluded.topic
                where illegal_latest.event_ts is null
                   or excluded.event_ts is null
                   or excluded.event_ts >= illegal_latest.event_ts
                "#
            }
        };

        let res = sqlx::query(sql)
            .bind(ILLEGAL_SNAPSHOT_KEY)
            .bind(count)
            .bind(Json(&batch.cars))
            .bind(batch.event_ts)
            .bind(batch.received_at)
            .bind(&batch.topic)
            .execute(&self.pool)
            .await
            .context("upsert illegal_latest failed")?;

        Ok(if res.rows_affected() == 0 {
            BatchOutcome::SkippedStale
        } else {
            BatchOutcome::Applied
        })
    }

    async fn load_slot_states(&self) -> Result<Vec<SlotStateRow>> {
        let rows = sqlx::query(
            r#"
            select slot, legacy_label, status, confidence, updated_at
            from slot_latest
            order by slot asc nulls last, legacy_label asc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_slot_states failed")?;

        rows.iter()
            .map(|r| -> Result<SlotStateRow> {
                Ok(SlotStateRow {
                    key: key_from_row(r)?,
                    status: status_from_row(r, "status")?,
                    confidence: r.try_get("confidence")?,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn load_first_seen(&self, slot: SlotId) -> Result<Option<FirstSeenRow>> {
        let row = sqlx::query(
            r#"
            select slot, original_label, status, confidence, payload, topic, first_seen_at
            from raw_first_seen
            where slot = $1
            "#,
        )
        .bind(slot.get())
        .fetch_optional(&self.pool)
        .await
        .context("load_first_seen failed")?;

        row.map(|r| -> Result<FirstSeenRow> {
            Ok(FirstSeenRow {
                slot: slot_from_row(&r, "slot")?,
                original_label: r.try_get("original_label")?,
                status: status_from_row(&r, "status")?,
                confidence: r.try_get("confidence")?,
                payload: r.try_get::<Json<serde_json::Value>, _>("payload")?.0,
                topic: r.try_get("topic")?,
                first_seen_at: r.try_get("first_seen_at")?,
            })
        })
        .transpose()
    }

    async fn load_changes(&self, slot: SlotId) -> Result<Vec<ChangeRow>> {
        let rows = sqlx::query(
            r#"
            select slot, status, confidence, changed_at
            from slot_changes
            where slot = $1
            order by changed_at desc, change_id desc
            "#,
        )
        .bind(slot.get())
        .fetch_all(&self.pool)
        .await
        .context("load_changes failed")?;

        rows.iter()
            .map(|r| -> Result<ChangeRow> {
                Ok(ChangeRow {
                    slot: slot_from_row(r, "slot")?,
                    status: status_from_row(r, "status")?,
                    confidence: r.try_get("confidence")?,
                    changed_at: r.try_get("changed_at")?,
                })
            })
            .collect()
    }

    async fn load_latest_batch(&self) -> Result<Option<BatchSnapshotRow>> {
        let row = sqlx::query(
            r#"
            select car_count, cars, event_ts, received_at, topic
            from illegal_latest
            where snapshot_key = $1
            "#,
        )
        .bind(ILLEGAL_SNAPSHOT_KEY)
        .fetch_optional(&self.pool)
        .await
        .context("load_latest_batch failed")?;

        row.map(|r| -> Result<BatchSnapshotRow> {
            let count: i32 = r.try_get("car_count")?;
            Ok(BatchSnapshotRow {
                count: u32::try_from(count).context("negative car_count in illegal_latest")?,
                cars: r.try_get::<Json<Vec<Car>>, _>("cars")?.0,
                event_ts: r.try_get("event_ts")?,
                received_at: r.try_get("received_at")?,
                topic: r.try_get("topic")?,
            })
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Write helpers (run inside the decision transaction)
// ---------------------------------------------------------------------------

async fn upsert_slot_state(
    conn: &mut PgConnection,
    slot: SlotId,
    status: Occupancy,
    confidence: Option<f64>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into slot_latest (slot, status, confidence, updated_at)
        values ($1, $2, $3, $4)
        on conflict (slot) do update
        set status     = excluded.status,
            confidence = excluded.confidence,
            updated_at = greatest(slot_latest.updated_at, excluded.updated_at)
        "#,
    )
    .bind(slot.get())
    .bind(status.as_i16())
    .bind(confidence)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("upsert slot_latest failed")?;
    Ok(())
}

/// Rewrite a legacy label-keyed row to its canonical key. Returns `false` if
/// the row no longer exists.
async fn rekey_legacy_row(
    conn: &mut PgConnection,
    label: &str,
    slot: SlotId,
    status: Occupancy,
    confidence: Option<f64>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update slot_latest
        set slot         = $2,
            legacy_label = null,
            status       = $3,
            confidence   = $4,
            updated_at   = greatest(updated_at, $5)
        where slot is null and legacy_label = $1
        "#,
    )
    .bind(label)
    .bind(slot.get())
    .bind(status.as_i16())
    .bind(confidence)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("rekey legacy slot_latest row failed")?;

    Ok(res.rows_affected() > 0)
}

async fn insert_change(
    conn: &mut PgConnection,
    slot: SlotId,
    status: Occupancy,
    confidence: Option<f64>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into slot_changes (slot, status, confidence, changed_at)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(slot.get())
    .bind(status.as_i16())
    .bind(confidence)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("insert slot_changes failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn slot_from_row(r: &PgRow, col: &str) -> Result<SlotId> {
    let n: i64 = r.try_get(col)?;
    SlotId::new(n).ok_or_else(|| anyhow!("non-positive slot {n} in column {col}"))
}

fn status_from_row(r: &PgRow, col: &str) -> Result<Occupancy> {
    let v: i16 = r.try_get(col)?;
    Occupancy::from_i16(v).ok_or_else(|| anyhow!("invalid status {v} in column {col}"))
}

fn key_from_row(r: &PgRow) -> Result<PriorKey> {
    let slot: Option<i64> = r.try_get("slot")?;
    match slot {
        Some(_) => Ok(PriorKey::Canonical(slot_from_row(r, "slot")?)),
        None => {
            let label: Option<String> = r.try_get("legacy_label")?;
            label
                .map(PriorKey::Legacy)
                .ok_or_else(|| anyhow!("slot_latest row has neither slot nor legacy_label"))
        }
    }
}
