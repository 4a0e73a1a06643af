//! park-daemon entry point.
//!
//! Thin wiring: tracing, settings, secrets, Postgres, then the bus listener
//! until a shutdown signal. The pipeline itself lives in the library target.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use park_daemon::{bootstrap, mqtt_options, BusListener, IngestContext, Ingestor};
use park_db::PgStore;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    // Config layers: positional args win over PARK_CONFIG.
    let mut paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        paths = bootstrap::config_paths_from_env();
    }
    let settings = bootstrap::load_settings(&paths)?;
    let secrets = park_config::resolve_secrets(&settings)?;

    let pool = park_db::connect(&secrets.database_url, settings.db.max_connections).await?;
    park_db::migrate(&pool).await.context("startup migrate")?;

    let ctx = Arc::new(IngestContext::new(
        Arc::new(PgStore::new(pool.clone())),
        settings.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    bootstrap::spawn_shutdown_signal(shutdown_tx);
    bootstrap::spawn_stats_logger(
        Arc::clone(&ctx),
        Duration::from_secs(settings.ingest.stats_interval_secs),
        shutdown_rx.clone(),
    );

    let listener = BusListener::new(Ingestor::new(ctx), mqtt_options(&settings, &secrets));
    listener.run(shutdown_rx).await?;

    pool.close().await;
    info!("park-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
