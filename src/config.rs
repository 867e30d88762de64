//! Validated ingestion configuration: one value object built at startup and
//! passed by reference into the connection and loader layers.
//!
//! Values come from the environment (optionally via `.env`) with CLI flags
//! layered on top; both entry styles populate the same `IngestConfig`.

use std::sync::Once;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::db::RetryPolicy;

pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BASE_BACKOFF_SECS: u64 = 5;

static INIT: Once = Once::new();

/// Load `.env` exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

// SECURITY: no Debug derive; the password field must never reach logs.
#[derive(Clone)]
pub struct IngestConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub table_name: String,
    /// Local CSV path or http(s) URL to download.
    pub source: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

const REQUIRED_KEYS: [&str; 7] = [
    "DB_HOST",
    "DB_PORT",
    "DB_USER",
    "DB_PASSWORD",
    "DB_NAME",
    "TABLE_NAME",
    "SOURCE",
];

impl IngestConfig {
    /// Build from process environment (after `init_env`).
    pub fn from_env() -> Result<Self> {
        init_env();
        Self::from_lookup(|key| env_opt(key))
    }

    /// Build from an arbitrary key lookup. Every missing required key is
    /// reported in a single error so a misconfigured deploy fails once,
    /// not once per key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| lookup(key).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("missing required configuration: {}", missing.join(", "));
        }

        let db_port: u16 = lookup("DB_PORT")
            .unwrap_or_default()
            .trim()
            .parse()
            .context("DB_PORT is not a valid port number")?;
        let batch_size = parse_or_default(&lookup, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        let max_retries = parse_or_default(&lookup, "MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        if max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }
        let backoff_secs =
            parse_or_default(&lookup, "BASE_BACKOFF_SECONDS", DEFAULT_BASE_BACKOFF_SECS)?;

        Ok(Self {
            db_host: lookup("DB_HOST").unwrap_or_default(),
            db_port,
            db_user: lookup("DB_USER").unwrap_or_default(),
            db_password: lookup("DB_PASSWORD").unwrap_or_default(),
            db_name: lookup("DB_NAME").unwrap_or_default(),
            table_name: lookup("TABLE_NAME").unwrap_or_default(),
            source: lookup("SOURCE").unwrap_or_default(),
            batch_size,
            max_retries,
            base_backoff: Duration::from_secs(backoff_secs),
        })
    }

    /// Postgres DSN built via `url::Url` so credentials with reserved
    /// characters are percent-encoded safely.
    pub fn dsn(&self) -> Result<String> {
        let mut out =
            url::Url::parse("postgresql://localhost").context("building postgres DSN")?;
        out.set_username(&self.db_user)
            .ok()
            .context("invalid DB_USER for DSN")?;
        out.set_password(Some(&self.db_password))
            .ok()
            .context("invalid DB_PASSWORD for DSN")?;
        out.set_host(Some(&self.db_host))
            .with_context(|| format!("invalid DB_HOST {:?}", self.db_host))?;
        out.set_port(Some(self.db_port))
            .ok()
            .context("invalid DB_PORT for DSN")?;
        out.set_path(&format!("/{}", self.db_name));
        Ok(out.to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: self.base_backoff,
        }
    }

    /// Log a credential-free snapshot of the effective configuration.
    pub fn log_snapshot(&self) {
        info!(
            host = %self.db_host,
            port = self.db_port,
            user = %self.db_user,
            database = %self.db_name,
            table = %self.table_name,
            source = %self.source,
            batch_size = self.batch_size,
            max_retries = self.max_retries,
            base_backoff_s = self.base_backoff.as_secs(),
            "configuration snapshot"
        );
    }
}

fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} is not a valid number: {raw:?}")),
        None => Ok(default),
    }
}

/// Optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
