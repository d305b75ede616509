use std::env;
use std::fmt;

use hubsync_common::error::{HubsyncError, HubsyncResult};
use hubsync_common::types::WriteMode;
use serde::Deserialize;

/// Where the destination Postgres database lives.
#[derive(Clone, Deserialize)]
pub enum DatabaseConfig {
    /// A full connection URL (`DATABASE_URL`).
    Url(String),
    /// Discrete connection parameters (`POSTGRES_*`).
    Params {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: Option<String>,
    },
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseConfig::Url(_) => f.write_str("Url(<redacted>)"),
            DatabaseConfig::Params {
                host,
                port,
                database,
                user,
                ..
            } => f
                .debug_struct("Params")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins; otherwise host, database and user are required.
    pub fn from_env() -> HubsyncResult<Self> {
        if let Some(url) = get_non_empty("DATABASE_URL") {
            return Ok(DatabaseConfig::Url(url));
        }

        Ok(DatabaseConfig::Params {
            host: get_var("POSTGRES_HOST")?,
            port: get_var_or("POSTGRES_PORT", "5432")
                .parse()
                .map_err(|e| HubsyncError::Config(format!("invalid POSTGRES_PORT: {e}")))?,
            database: get_var("POSTGRES_DB")?,
            user: get_var("POSTGRES_USER")?,
            password: get_non_empty("POSTGRES_PASSWORD"),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub create_database: bool,
    pub write_mode: WriteMode,
    pub deadline_secs: Option<u64>,
    pub lock_stale_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> HubsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let deadline_secs = match get_non_empty("SYNC_DEADLINE_SECS") {
            Some(v) => Some(
                v.parse()
                    .map_err(|e| HubsyncError::Config(format!("invalid SYNC_DEADLINE_SECS: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            create_database: parse_bool(&get_var_or("POSTGRES_CREATE_DATABASE", "false"))
                .ok_or_else(|| {
                    HubsyncError::Config("POSTGRES_CREATE_DATABASE must be true or false".into())
                })?,
            write_mode: get_var_or("SYNC_WRITE_MODE", "merge").parse()?,
            deadline_secs,
            lock_stale_secs: get_var_or("SYNC_LOCK_STALE_SECS", "3600")
                .parse()
                .map_err(|e| HubsyncError::Config(format!("invalid SYNC_LOCK_STALE_SECS: {e}")))?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }
}

fn get_var(key: &str) -> HubsyncResult<String> {
    get_non_empty(key)
        .ok_or_else(|| HubsyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    get_non_empty(key).unwrap_or_else(|| default.to_owned())
}

fn get_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
