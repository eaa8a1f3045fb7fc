//! Locked Aggregates
//!
//! A handle on one shared JSON document (team, report, user...):
//! - **Lazy**: nothing is read until the document is first needed
//! - **Lockable**: `block()` takes the lease on the id and drops the cached
//!   copy, so the next read sees what other writers committed
//! - **Explicit save**: `save()` writes the document and releases the lease
//!
//! Any read-modify-write another identity could interleave with goes through
//! `block()` ... `save()` (or `update`, which wraps both). Documents only one
//! identity writes may be saved unlocked, last write wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{get_doc, set_doc, KeyValueStore, LockConfig, LockLease};

/// Anything that can be stored as an aggregate document
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Document for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

pub struct Aggregate<D: Document> {
    id: String,
    store: Arc<dyn KeyValueStore>,
    lock_config: LockConfig,
    doc: Option<D>,
    lease: Option<LockLease>,
}

impl<D: Document> Aggregate<D> {
    /// Handle on an existing id. Nothing is read yet.
    pub fn load(store: Arc<dyn KeyValueStore>, lock_config: LockConfig, id: &str) -> Self {
        Self {
            id: id.to_string(),
            store,
            lock_config,
            doc: None,
            lease: None,
        }
    }

    /// Allocate a fresh id under `prefix` and build the document for it.
    /// The document is not written until `save()`.
    pub async fn create(
        store: Arc<dyn KeyValueStore>,
        lock_config: LockConfig,
        prefix: &str,
        build: impl FnOnce(&str) -> D + Send,
    ) -> Result<Self> {
        let id = store.create_unique_key(prefix).await?;
        let doc = build(&id);
        info!("Created {}", id);
        Ok(Self {
            id,
            store,
            lock_config,
            doc: Some(doc),
            lease: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_locked(&self) -> bool {
        self.lease.is_some()
    }

    /// Read the document if it is not cached yet
    async fn fetch(&mut self) -> Result<()> {
        if self.doc.is_none() {
            self.doc = get_doc(self.store.as_ref(), &self.id).await?;
        }
        Ok(())
    }

    /// Whether the document exists in the store (or was created here)
    pub async fn exists(&mut self) -> Result<bool> {
        self.fetch().await?;
        Ok(self.doc.is_some())
    }

    pub async fn try_get(&mut self) -> Result<Option<&D>> {
        self.fetch().await?;
        Ok(self.doc.as_ref())
    }

    pub async fn get(&mut self) -> Result<&D> {
        self.fetch().await?;
        match self.doc.as_ref() {
            Some(doc) => Ok(doc),
            None => Err(Error::internal(format!("{} not found", self.id))),
        }
    }

    pub async fn get_mut(&mut self) -> Result<&mut D> {
        self.fetch().await?;
        match self.doc.as_mut() {
            Some(doc) => Ok(doc),
            None => Err(Error::internal(format!("{} not found", self.id))),
        }
    }

    /// Document, or `init()` when the id was never saved
    pub async fn get_or_insert_with(&mut self, init: impl FnOnce() -> D + Send) -> Result<&mut D> {
        self.fetch().await?;
        Ok(self.doc.get_or_insert_with(init))
    }

    /// Take the lock and forget the cached document
    pub async fn block(&mut self) -> Result<()> {
        if self.lease.is_none() {
            self.lease = Some(self.store.lock(&self.id, &self.lock_config).await?);
        }
        self.doc = None;
        Ok(())
    }

    /// Write the document, then release the lock if held
    pub async fn save(&mut self) -> Result<()> {
        let written = match self.doc.as_ref() {
            Some(doc) => set_doc(self.store.as_ref(), &self.id, doc).await,
            None => {
                self.release().await?;
                return Err(Error::internal(format!(
                    "save {} with no document loaded",
                    self.id
                )));
            }
        };
        if let Err(e) = written {
            self.release().await?;
            return Err(e.into());
        }
        debug!("Saved {}", self.id);
        self.release().await
    }

    /// Release the lock without writing
    pub async fn release(&mut self) -> Result<()> {
        if let Some(lease) = self.lease.take() {
            if !self.store.unlock(&lease).await? {
                warn!(
                    "Lease on {} expired before release (held {:?}, lease {:?})",
                    self.id,
                    lease.acquired_at.elapsed(),
                    lease.lease
                );
            }
        }
        Ok(())
    }

    /// Locked read-modify-write: block, apply `f` to the fresh document,
    /// save on success, release untouched on error
    pub async fn update<T>(&mut self, f: impl FnOnce(&mut D) -> Result<T> + Send) -> Result<T> {
        self.block().await?;

        if let Err(e) = self.fetch().await {
            self.release().await?;
            return Err(e);
        }

        let result = match self.doc.as_mut() {
            Some(doc) => f(doc),
            None => Err(Error::internal(format!("{} not found", self.id))),
        };

        self.finish(result).await
    }

    /// Like `update`, starting from `init()` when the id was never saved
    pub async fn upsert<T>(
        &mut self,
        init: impl FnOnce() -> D + Send,
        f: impl FnOnce(&mut D) -> Result<T> + Send,
    ) -> Result<T> {
        self.block().await?;

        if let Err(e) = self.fetch().await {
            self.release().await?;
            return Err(e);
        }

        let result = f(self.doc.get_or_insert_with(init));
        self.finish(result).await
    }

    async fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.save().await?;
                Ok(value)
            }
            Err(e) => {
                // Throw away the half-applied change
                self.doc = None;
                self.release().await?;
                Err(e)
            }
        }
    }
}

impl<D: Document> Drop for Aggregate<D> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.as_ref().filter(|l| !l.is_expired()) {
            warn!(
                "{} dropped while locked; lock held until lease ends ({:?})",
                self.id, lease.lease
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    fn fast_locks() -> LockConfig {
        LockConfig {
            lease: Duration::from_secs(5),
            wait: Duration::from_millis(100),
            retry_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_load_is_lazy() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut agg: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-1");
        assert!(!agg.exists().await.unwrap());

        set_doc(store.as_ref(), "counter-1", &Counter { value: 3 }).await.unwrap();
        // Misses are not cached
        assert_eq!(agg.get().await.unwrap().value, 3);
    }

    #[tokio::test]
    async fn test_block_reloads_fresh_copy() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        set_doc(store.as_ref(), "counter-1", &Counter { value: 1 }).await.unwrap();

        let mut agg: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-1");
        assert_eq!(agg.get().await.unwrap().value, 1);

        // Another writer commits in between
        set_doc(store.as_ref(), "counter-1", &Counter { value: 7 }).await.unwrap();

        agg.block().await.unwrap();
        assert_eq!(agg.get().await.unwrap().value, 7);
        agg.get_mut().await.unwrap().value += 1;
        agg.save().await.unwrap();
        assert!(!agg.is_locked());

        let stored: Counter = get_doc(store.as_ref(), "counter-1").await.unwrap().unwrap();
        assert_eq!(stored.value, 8);
    }

    #[tokio::test]
    async fn test_save_without_document_is_internal_error() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut agg: Aggregate<Counter> = Aggregate::load(store, fast_locks(), "counter-1");
        assert!(matches!(agg.save().await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_save_after_block_without_read_releases_lock() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        set_doc(store.as_ref(), "counter-1", &Counter::default()).await.unwrap();

        let mut agg: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-1");
        agg.block().await.unwrap();
        assert!(matches!(agg.save().await, Err(Error::Internal(_))));
        assert!(!agg.is_locked());
        drop(agg);

        let lease = store
            .try_lock("counter-1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn test_block_times_out_while_held() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        set_doc(store.as_ref(), "counter-1", &Counter::default()).await.unwrap();

        let mut first: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-1");
        let mut second: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-1");
        first.block().await.unwrap();

        let err = second.block().await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        first.release().await.unwrap();
        second.block().await.unwrap();
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_error_leaves_document_untouched() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        set_doc(store.as_ref(), "counter-1", &Counter { value: 2 }).await.unwrap();

        let mut agg: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-1");
        let result: Result<()> = agg
            .update(|c| {
                c.value = 100;
                Err(Error::user("nope"))
            })
            .await;
        assert!(matches!(result, Err(Error::UserInput(_))));
        assert!(!agg.is_locked());

        let stored: Counter = get_doc(store.as_ref(), "counter-1").await.unwrap().unwrap();
        assert_eq!(stored.value, 2);
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_document() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut agg: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-9");

        let value = agg
            .upsert(Counter::default, |c| {
                c.value += 1;
                Ok(c.value)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);

        // `update` refuses a missing document, `upsert` does not
        let mut missing: Aggregate<Counter> = Aggregate::load(store.clone(), fast_locks(), "counter-0");
        assert!(matches!(missing.update(|_| Ok(())).await, Err(Error::Internal(_))));
        assert!(!missing.is_locked());
    }

    #[tokio::test]
    async fn test_concurrent_updates_never_lose_writes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        set_doc(store.as_ref(), "counter-1", &Counter::default()).await.unwrap();

        let locks = LockConfig {
            lease: Duration::from_secs(5),
            wait: Duration::from_secs(5),
            retry_interval: Duration::from_millis(1),
        };
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                let mut agg: Aggregate<Counter> = Aggregate::load(store, locks, "counter-1");
                agg.update(|c| {
                    c.value += 1;
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored: Counter = get_doc(store.as_ref(), "counter-1").await.unwrap().unwrap();
        assert_eq!(stored.value, 8);
    }
}
