//! Key-Value Storage
//!
//! The only persistence the engine needs:
//! - JSON documents by key (get/set/delete)
//! - Unique key allocation under a prefix
//! - Lease-bounded mutual exclusion per key
//!
//! Backends:
//! - [`MemoryStore`]: process-local, for tests and single-instance runs
//! - [`SqliteStore`]: single file, survives restarts
//! - [`RedisStore`]: shared between instances

pub mod memory;
pub mod redis;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock on {key} not acquired after {waited_ms}ms")]
    LockTimeout { key: String, waited_ms: u128 },
}

/// Lock acquisition settings
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long a held lock stays valid without being released
    pub lease: Duration,
    /// How long `lock` keeps retrying before giving up
    pub wait: Duration,
    /// Pause between attempts
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(5),
            wait: Duration::from_secs(3),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// A held lock. The token identifies the holder so a lease that expired and
/// was taken over cannot be released by its previous owner.
#[derive(Debug, Clone)]
pub struct LockLease {
    pub key: String,
    pub token: String,
    pub lease: Duration,
    pub acquired_at: Instant,
}

impl LockLease {
    pub fn new(key: &str, lease: Duration) -> Self {
        Self {
            key: key.to_string(),
            token: Uuid::new_v4().to_string(),
            lease,
            acquired_at: Instant::now(),
        }
    }

    /// Whether the lease ran out (another holder may own the key now)
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.lease
    }
}

/// Key-value store trait - implement for each backend
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every key and lock
    async fn clear(&self) -> Result<(), StoreError>;

    /// Try once to take the lock on `key`
    async fn try_lock(&self, key: &str, lease: Duration) -> Result<Option<LockLease>, StoreError>;

    /// Release a lock. Returns false if the lease was no longer ours.
    async fn unlock(&self, lease: &LockLease) -> Result<bool, StoreError>;

    /// Find a random and unused key under `prefix`
    async fn create_unique_key(&self, prefix: &str) -> Result<String, StoreError> {
        loop {
            let key = format!("{}{}", prefix, Uuid::new_v4());
            if self.get(&key).await?.is_none() {
                return Ok(key);
            }
        }
    }

    /// Take the lock on `key`, retrying until `config.wait` elapses
    async fn lock(&self, key: &str, config: &LockConfig) -> Result<LockLease, StoreError> {
        let started = Instant::now();
        loop {
            if let Some(lease) = self.try_lock(key, config.lease).await? {
                debug!("Locked {} on {}", key, self.name());
                return Ok(lease);
            }
            if started.elapsed() >= config.wait {
                return Err(StoreError::LockTimeout {
                    key: key.to_string(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            tokio::time::sleep(config.retry_interval).await;
        }
    }
}

/// Read and deserialize a document
pub async fn get_doc<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write a document
pub async fn set_doc<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    doc: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(doc)?;
    store.set(key, &value).await
}

/// Build the backend selected in the configuration
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match &config.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite(path) => Arc::new(SqliteStore::open(path)?),
        StoreBackend::Redis(url) => Arc::new(RedisStore::connect(url).await?),
    };
    Ok(store)
}
