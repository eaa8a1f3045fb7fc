//! Redis key-value store
//!
//! Values are JSON strings. A lock is a separate `lock:<key>` entry set with
//! `NX PX <lease>`, so Redis expires it on its own; release runs a small
//! script that deletes the entry only if it still carries our token.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{KeyValueStore, LockLease, StoreError};

/// Compare-and-delete for lock release
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis instance (e.g. `redis://redis:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis store connected: {}", url);
        Ok(Self { conn })
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{}", key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        debug!("Get {} (found: {})", key, raw.is_some());

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        let _: () = conn.set(key, raw).await?;
        debug!("Set {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        debug!("Delete {}", key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        info!("Redis store cleared");
        Ok(())
    }

    async fn create_unique_key(&self, prefix: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        loop {
            let key = format!("{}{}", prefix, Uuid::new_v4());
            let exists: bool = conn.exists(&key).await?;
            if !exists {
                return Ok(key);
            }
        }
    }

    async fn try_lock(&self, key: &str, lease: Duration) -> Result<Option<LockLease>, StoreError> {
        let mut conn = self.conn.clone();
        let held = LockLease::new(key, lease);

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(key))
            .arg(&held.token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| held))
    }

    async fn unlock(&self, lease: &LockLease) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = Script::new(RELEASE_SCRIPT)
            .key(Self::lock_key(&lease.key))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
