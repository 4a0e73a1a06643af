//! park-db
//!
//! Persistence Gateway for the parking ingest core: the [`ParkingStore`]
//! trait, its Postgres implementation, embedded migrations and operator
//! helpers (status, legacy-row canonicalization).

mod legacy;
mod pg;
mod store;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub use legacy::{canonicalize_legacy_rows, LegacyMigrationReport};
pub use pg::{PgStore, ILLEGAL_SNAPSHOT_KEY};
pub use store::{
    BatchSnapshotRow, ChangeRow, FirstSeenRow, IllegalBatch, ParkingStore, SlotStateRow,
    StatusWrite,
};

pub const ENV_DB_URL: &str = "PARK_DATABASE_URL";

/// Connect to Postgres using PARK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10).await
}

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_slot_tables: bool,
    /// `slot_latest` rows still keyed by their raw label.
    pub legacy_rows: i64,
}

/// Connectivity + schema presence + outstanding legacy rows.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select count(*) = 4
        from information_schema.tables
        where table_schema = 'public'
          and table_name in ('slot_latest', 'raw_first_seen', 'slot_changes', 'illegal_latest')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let legacy_rows = if exists {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*)::bigint from slot_latest where slot is null",
        )
        .fetch_one(pool)
        .await
        .context("status legacy-row count failed")?;
        n
    } else {
        0
    };

    Ok(DbStatus {
        ok: one == 1,
        has_slot_tables: exists,
        legacy_rows,
    })
}
