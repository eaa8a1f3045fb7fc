//! Configuration management

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::LockConfig;

/// Which key-value backend to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite(PathBuf),
    Redis(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Key-value backend
    pub store: StoreBackend,

    /// Lease and retry settings for aggregate locks
    pub lock: LockConfig,

    /// Abandoned conversations older than this start over (None = keep forever)
    pub talk_ttl: Option<Duration>,

    /// Webhook port
    pub port: u16,

    /// Wipe the store on startup (test deployments)
    pub reset_store: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            lock: LockConfig::default(),
            talk_ttl: None,
            port: 10101,
            reset_store: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let store = match std::env::var("ROLLCALL_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "sqlite" => {
                let db_path = std::env::var("ROLLCALL_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        dirs::data_local_dir()
                            .unwrap_or_else(|| PathBuf::from("."))
                            .join("rollcall")
                            .join("rollcall.db")
                    });
                StoreBackend::Sqlite(db_path)
            }
            "redis" => {
                let url = std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
                StoreBackend::Redis(url)
            }
            other => bail!("Unknown ROLLCALL_STORE backend: {}", other),
        };

        let lock = LockConfig {
            lease: env_millis("ROLLCALL_LOCK_LEASE_MS").unwrap_or(defaults.lock.lease),
            wait: env_millis("ROLLCALL_LOCK_WAIT_MS").unwrap_or(defaults.lock.wait),
            retry_interval: env_millis("ROLLCALL_LOCK_RETRY_MS")
                .unwrap_or(defaults.lock.retry_interval),
        };

        let talk_ttl = std::env::var("ROLLCALL_TALK_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs);

        let port = std::env::var("ROLLCALL_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let reset_store = std::env::var("ROLLCALL_RESET_STORE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            store,
            lock,
            talk_ttl,
            port,
            reset_store,
        })
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
