//! SQLite key-value store
//!
//! Documents live in one `kv` table as JSON text. Locks are rows in `locks`
//! with an absolute expiry; an expired row is overwritten by the next
//! acquirer in the same upsert that takes the lock.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{KeyValueStore, LockLease, StoreError};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("SQLite store opened: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        debug!("Get {} (found: {})", key, raw.is_some());

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.conn.lock().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, raw],
        )?;
        debug!("Set {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        debug!("Delete {}", key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute_batch("DELETE FROM kv; DELETE FROM locks;")?;
        info!("SQLite store cleared");
        Ok(())
    }

    async fn try_lock(&self, key: &str, lease: Duration) -> Result<Option<LockLease>, StoreError> {
        let held = LockLease::new(key, lease);
        let now = now_millis();
        let expires_at = now + lease.as_millis() as i64;

        let rows = self.conn.lock().execute(
            "INSERT INTO locks (key, token, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET token = excluded.token, expires_at = excluded.expires_at
             WHERE locks.expires_at <= ?4",
            params![key, held.token, expires_at, now],
        )?;

        Ok(if rows > 0 { Some(held) } else { None })
    }

    async fn unlock(&self, lease: &LockLease) -> Result<bool, StoreError> {
        let rows = self.conn.lock().execute(
            "DELETE FROM locks WHERE key = ?1 AND token = ?2",
            params![lease.key, lease.token],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_roundtrip_and_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("talk-u1", &json!({"keyword": "a"})).await.unwrap();
        store.set("talk-u1", &json!({"keyword": "b"})).await.unwrap();

        let value = store.get("talk-u1").await.unwrap().unwrap();
        assert_eq!(value["keyword"], "b");
    }

    #[tokio::test]
    async fn test_lock_upsert_respects_expiry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .try_lock("report-1", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(store
            .try_lock("report-1", Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .try_lock("report-1", Duration::from_secs(5))
            .await
            .unwrap()
            .is_some());
    }
}
