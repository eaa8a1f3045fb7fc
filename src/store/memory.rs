//! In-process key-value store

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{KeyValueStore, LockLease, StoreError};

/// Memory store, shared by cloning an `Arc`
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
    /// key -> (holder token, lease end)
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = self.data.lock().get(key).cloned();
        debug!("Get {} (found: {})", key, value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        debug!("Set {}", key);
        self.data.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        debug!("Delete {}", key);
        self.data.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.data.lock().clear();
        self.locks.lock().clear();
        Ok(())
    }

    async fn try_lock(&self, key: &str, lease: Duration) -> Result<Option<LockLease>, StoreError> {
        let mut locks = self.locks.lock();
        let now = Instant::now();
        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let held = LockLease::new(key, lease);
        locks.insert(key.to_string(), (held.token.clone(), now + lease));
        Ok(Some(held))
    }

    async fn unlock(&self, lease: &LockLease) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock();
        match locks.get(&lease.key) {
            Some((token, _)) if *token == lease.token => {
                locks.remove(&lease.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
