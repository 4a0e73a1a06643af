//! Active migration of `slot_latest` rows keyed by a raw slot label.
//!
//! The ingest path already matches such rows by label and rewrites them on
//! their next transition. This sweep converts the rest in one pass.

use anyhow::{Context, Result};
use park_reconcile::normalize_slot_id;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyMigrationReport {
    /// Rows rewritten to their canonical key.
    pub rekeyed: u64,
    /// Rows dropped because a canonical row for the same slot already exists.
    pub superseded: u64,
    /// Labels without a usable slot number; left untouched.
    pub unparseable: Vec<String>,
}

/// Rewrite every legacy row whose label canonicalizes.
///
/// A canonical row always wins over a legacy row for the same slot: the
/// lookup already prefers it, so the legacy row is unreachable and is
/// deleted.
pub async fn canonicalize_legacy_rows(pool: &PgPool) -> Result<LegacyMigrationReport> {
    let rows = sqlx::query("select row_id, legacy_label from slot_latest where slot is null")
        .fetch_all(pool)
        .await
        .context("load legacy slot_latest rows failed")?;

    let mut report = LegacyMigrationReport::default();

    for r in rows {
        let row_id: i64 = r.try_get("row_id")?;
        let label: String = r.try_get("legacy_label")?;

        let slot = match normalize_slot_id(&label) {
            Ok(s) => s,
            Err(e) => {
                warn!(row_id, label = %label, error = %e, "legacy row left as-is");
                report.unparseable.push(label);
                continue;
            }
        };

        let mut tx = pool.begin().await.context("legacy migrate begin failed")?;

        let (canonical_exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
            "select exists (select 1 from slot_latest where slot = $1)",
        )
        .bind(slot.get())
        .fetch_one(&mut *tx)
        .await
        .context("legacy migrate exists check failed")?;

        if canonical_exists {
            sqlx::query("delete from slot_latest where row_id = $1")
                .bind(row_id)
                .execute(&mut *tx)
                .await
                .context("delete superseded legacy row failed")?;
            report.superseded += 1;
        } else {
            sqlx::query("update slot_latest set slot = $2, legacy_label = null where row_id = $1")
                .bind(row_id)
                .bind(slot.get())
                .execute(&mut *tx)
                .await
                .context("rekey legacy row failed")?;
            report.rekeyed += 1;
        }

        tx.commit().await.context("legacy migrate commit failed")?;
    }

    info!(
        rekeyed = report.rekeyed,
        superseded = report.superseded,
        unparseable = report.unparseable.len(),
        "legacy slot rows canonicalized"
    );
    Ok(report)
}
