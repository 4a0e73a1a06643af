//! Startup and lifecycle helpers shared by the daemon binary and the CLI.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use park_config::{IngestSettings, UnusedKeyPolicy};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::context::IngestContext;

/// Env var with a comma-separated list of YAML config layers.
pub const ENV_CONFIG_PATHS: &str = "PARK_CONFIG";

/// Config layer paths from `PARK_CONFIG`, if set.
pub fn config_paths_from_env() -> Vec<String> {
    std::env::var(ENV_CONFIG_PATHS)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Settings from YAML layers (built-in defaults when `paths` is empty),
/// then deployment env overrides.
pub fn load_settings(paths: &[String]) -> Result<IngestSettings> {
    let mut settings = if paths.is_empty() {
        info!("no config layers given; using built-in defaults");
        IngestSettings::default()
    } else {
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let loaded = park_config::load_layered_yaml(&refs).context("load config layers")?;
        let unused = park_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
        if !unused.is_empty() {
            warn!(keys = ?unused, "config keys not read by the daemon");
        }
        info!(config_hash = %loaded.config_hash, layers = ?paths, "config loaded");
        IngestSettings::from_config_json(&loaded.config_json)?
    };
    settings.apply_env_overrides(|k| std::env::var(k).ok())?;
    Ok(settings)
}

/// Flip `tx` to `true` on Ctrl-C or SIGTERM.
pub fn spawn_shutdown_signal(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Log the ingest counters every `interval` until shutdown. A zero interval
/// disables the task.
pub fn spawn_stats_logger(
    ctx: Arc<IngestContext>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    info!(
                        stats = ?ctx.stats.snapshot(),
                        active_slots = ctx.slot_locks.active(),
                        "ingest counters"
                    );
                }
            }
        }
    });
}
