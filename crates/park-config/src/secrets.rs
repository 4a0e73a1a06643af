//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only env var NAMES (`bus.credentials_env.*`, `db.url_env`).
//! - `resolve_secrets()` is called once at startup and the result is passed
//!   into constructors; no other code reads these env vars.
//! - `Debug` redacts values. Error messages name the variable, never the value.

use anyhow::{bail, Result};

use crate::IngestSettings;

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub bus_username: Option<String>,
    pub bus_password: Option<String>,
    pub database_url: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("bus_username", &self.bus_username.as_ref().map(|_| "<REDACTED>"))
            .field("bus_password", &self.bus_password.as_ref().map(|_| "<REDACTED>"))
            .field("database_url", &"<REDACTED>")
            .finish()
    }
}

/// Resolve secrets from the process environment.
pub fn resolve_secrets(settings: &IngestSettings) -> Result<ResolvedSecrets> {
    resolve_secrets_with(settings, |name| std::env::var(name).ok())
}

/// Resolve secrets through `get`.
///
/// The database URL is required. Bus credentials are optional, but a
/// password without a username is refused.
pub fn resolve_secrets_with<F>(settings: &IngestSettings, get: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |name: &str| get(name).filter(|v| !v.trim().is_empty());

    let names = &settings.bus.credentials_env;
    let bus_username = resolve(&names.username);
    let bus_password = resolve(&names.password);

    if bus_password.is_some() && bus_username.is_none() {
        bail!(
            "SECRETS_INCOMPLETE: '{}' is set but '{}' (bus username) is not",
            names.password,
            names.username
        );
    }

    let Some(database_url) = resolve(&settings.db.url_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            settings.db.url_env
        );
    };

    Ok(ResolvedSecrets {
        bus_username,
        bus_password,
        database_url,
    })
}
