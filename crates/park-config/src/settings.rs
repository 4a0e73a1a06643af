//! Typed, defaulted view over the merged config document.
//!
//! Every field has a default so the daemon can start from an empty config
//! plus environment. Secrets are not here; see [`crate::secrets`].

use anyhow::{bail, Context, Result};
use park_reconcile::BatchOrdering;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_STATUS_TOPIC: &str = "parking/status";
pub const DEFAULT_ILLEGAL_TOPIC: &str = "parking/illegal";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub bus: BusSettings,
    pub topics: TopicSettings,
    pub ingest: PipelineSettings,
    pub db: DbSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub host: String,
    pub port: u16,
    /// Generated per process when absent.
    pub client_id: Option<String>,
    pub tls: bool,
    pub keep_alive_secs: u64,
    pub credentials_env: CredentialEnvNames,
    pub reconnect: ReconnectSettings,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            client_id: None,
            tls: true,
            keep_alive_secs: 30,
            credentials_env: CredentialEnvNames::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Env var NAMES holding the bus credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialEnvNames {
    pub username: String,
    pub password: String,
}

impl Default for CredentialEnvNames {
    fn default() -> Self {
        Self {
            username: "PARK_MQTT_USER".to_string(),
            password: "PARK_MQTT_PASS".to_string(),
        }
    }
}

/// Exponential backoff bounds for bus reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub status: String,
    pub illegal: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            status: DEFAULT_STATUS_TOPIC.to_string(),
            illegal: DEFAULT_ILLEGAL_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Messages handled concurrently before the listener stops polling.
    pub max_in_flight: usize,
    pub illegal_ordering: BatchOrdering,
    /// Period of the ingest counters log line; 0 disables it.
    pub stats_interval_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            illegal_ordering: BatchOrdering::ArrivalOrder,
            stats_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbSettings {
    /// Env var NAME holding the Postgres URL.
    pub url_env: String,
    pub max_connections: u32,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            url_env: "PARK_DATABASE_URL".to_string(),
            max_connections: 10,
        }
    }
}

impl IngestSettings {
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let settings: Self =
            serde_json::from_value(cfg.clone()).context("config does not match ingest settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply the deployment env overrides (`PARK_BUS_HOST`, `PARK_BUS_PORT`,
    /// `PARK_STATUS_TOPIC`, `PARK_ILLEGAL_TOPIC`) via `get`, then re-validate.
    pub fn apply_env_overrides<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("PARK_BUS_HOST") {
            self.bus.host = host.trim().to_string();
        }
        if let Some(port) = get("PARK_BUS_PORT") {
            self.bus.port = port
                .trim()
                .parse()
                .with_context(|| format!("PARK_BUS_PORT is not a port number: {port:?}"))?;
        }
        if let Some(t) = get("PARK_STATUS_TOPIC") {
            self.topics.status = t.trim().to_string();
        }
        if let Some(t) = get("PARK_ILLEGAL_TOPIC") {
            self.topics.illegal = t.trim().to_string();
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.bus.host.trim().is_empty() {
            bail!("bus.host must not be empty");
        }
        if self.bus.port == 0 {
            bail!("bus.port must be > 0");
        }
        if self.topics.status.is_empty() || self.topics.illegal.is_empty() {
            bail!("topics.status and topics.illegal must not be empty");
        }
        if self.topics.status == self.topics.illegal {
            bail!(
                "topics.status and topics.illegal must differ (both {:?})",
                self.topics.status
            );
        }
        if self.ingest.max_in_flight == 0 {
            bail!("ingest.max_in_flight must be >= 1");
        }
        if self.bus.reconnect.base_ms == 0 || self.bus.reconnect.base_ms > self.bus.reconnect.max_ms
        {
            bail!(
                "bus.reconnect requires 0 < base_ms <= max_ms (got {} / {})",
                self.bus.reconnect.base_ms,
                self.bus.reconnect.max_ms
            );
        }
        if self.db.max_connections == 0 {
            bail!("db.max_connections must be >= 1");
        }
        Ok(())
    }
}
