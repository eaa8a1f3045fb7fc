//! Key-Value Store Integration Tests
//!
//! Persistence and lease-lock behavior of the on-disk backends.

use rollcall::store::{get_doc, set_doc};
use rollcall::{
    Aggregate, Config, Dispatcher, KeyValueStore, LockConfig, NullMessenger, RedisStore,
    SqliteStore, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tally {
    count: u32,
}

fn create_test_store(name: &str) -> (Arc<dyn KeyValueStore>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join(format!("{}.db", name));
    let store = SqliteStore::open(&db_path).expect("Failed to create store");
    (Arc::new(store), temp_dir)
}

fn patient_locks() -> LockConfig {
    LockConfig {
        lease: Duration::from_secs(5),
        wait: Duration::from_secs(10),
        retry_interval: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn test_documents_survive_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("nested").join("rollcall.db");

    {
        let store = SqliteStore::open(&db_path).unwrap();
        store.set("team-1", &json!({"name": "Team1"})).await.unwrap();
    }

    let store = SqliteStore::open(&db_path).unwrap();
    let value = store.get("team-1").await.unwrap().unwrap();
    assert_eq!(value["name"], "Team1");
}

#[tokio::test]
async fn test_unique_keys_use_prefix() {
    let (store, _temp) = create_test_store("keys");
    let a = store.create_unique_key("report-").await.unwrap();
    let b = store.create_unique_key("report-").await.unwrap();
    assert!(a.starts_with("report-"));
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_lock_is_exclusive_until_released() {
    let (store, _temp) = create_test_store("exclusive");
    let quick = LockConfig {
        lease: Duration::from_secs(5),
        wait: Duration::from_millis(50),
        retry_interval: Duration::from_millis(5),
    };

    let held = store.lock("team-1", &quick).await.unwrap();
    match store.lock("team-1", &quick).await {
        Err(StoreError::LockTimeout { key, .. }) => assert_eq!(key, "team-1"),
        other => panic!("expected timeout, got {:?}", other.map(|l| l.key)),
    }

    assert!(store.unlock(&held).await.unwrap());
    // Releasing twice is harmless and reports the lease is gone
    assert!(!store.unlock(&held).await.unwrap());
    assert!(store.lock("team-1", &quick).await.is_ok());
}

#[tokio::test]
async fn test_expired_lease_can_be_taken_over() {
    let (store, _temp) = create_test_store("expiry");
    let stale = store
        .try_lock("report-1", Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let fresh = store
        .try_lock("report-1", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    // The old holder can no longer release the new holder's lock
    assert!(!store.unlock(&stale).await.unwrap());
    assert!(store.unlock(&fresh).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_updates_are_serialized() {
    let (store, _temp) = create_test_store("concurrent");
    set_doc(store.as_ref(), "tally", &Tally::default()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut tally: Aggregate<Tally> = Aggregate::load(store, patient_locks(), "tally");
            tally
                .update(|t| {
                    t.count += 1;
                    Ok(())
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let tally: Tally = get_doc(store.as_ref(), "tally").await.unwrap().unwrap();
    assert_eq!(tally.count, 10);
}

#[tokio::test]
async fn test_conversation_resumes_after_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("talk.db");

    let dispatcher = |store: Arc<dyn KeyValueStore>| {
        Dispatcher::new(
            rollcall::commands::registry().unwrap(),
            store,
            Arc::new(NullMessenger),
            Config::default(),
        )
    };

    {
        let d = dispatcher(Arc::new(SqliteStore::open(&db_path).unwrap()));
        d.handle("admin", "create team").await;
        d.handle("admin", "Team1").await;
    }

    let d = dispatcher(Arc::new(SqliteStore::open(&db_path).unwrap()));
    d.handle("admin", "學號").await;
    let t = d.handle("admin", "結束").await;
    assert!(t.text.contains("名稱: Team1"));
    assert!(t.text.contains("加入問題: 學號"));
}

/// Needs a running server: `REDIS_URL=redis://127.0.0.1/15 cargo test -- --ignored`
#[tokio::test]
#[ignore]
async fn test_redis_lock_roundtrip() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let store = RedisStore::connect(&url).await.expect("Failed to connect to Redis");
    store.clear().await.unwrap();

    store.set("team-1", &json!({"name": "Team1"})).await.unwrap();
    assert_eq!(store.get("team-1").await.unwrap().unwrap()["name"], "Team1");

    let held = store.try_lock("team-1", Duration::from_secs(5)).await.unwrap().unwrap();
    assert!(store.try_lock("team-1", Duration::from_secs(5)).await.unwrap().is_none());
    assert!(store.unlock(&held).await.unwrap());

    store.delete("team-1").await.unwrap();
    assert!(store.get("team-1").await.unwrap().is_none());
}
