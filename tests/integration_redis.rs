//! Integration tests against a live Redis server
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`

#![cfg(feature = "redis")]

mod common;

use common::*;
use session_cache_guard::{KeyValueStore, RedisStore};
use std::time::Duration;

async fn connect() -> RedisStore {
    RedisStore::with_url(&redis_url()).await.unwrap()
}

/// Test basic set/get/remove against Redis
#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_roundtrip() {
    let store = connect().await;
    let key = test_key("roundtrip");

    store.set_with_ttl(&key, b"payload", Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Some(b"payload".to_vec()));

    store.remove(&key).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), None);
    store.ping().await.unwrap();
}

/// Test SCAN-based collection and bulk removal
#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_scan_and_bulk_remove() {
    let store = connect().await;
    let prefix = test_key("scan");
    for i in 0..250 {
        store
            .set_with_ttl(&format!("{prefix}:{i}"), b"x", Duration::from_secs(60))
            .await
            .unwrap();
    }

    let mut keys = store.scan_keys(&format!("{prefix}:*")).await.unwrap();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 250);

    assert_eq!(store.remove_bulk(&keys).await.unwrap(), 250);
    assert!(store.scan_keys(&format!("{prefix}:*")).await.unwrap().is_empty());
}

/// Test the sorted-set sliding window
#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_sliding_window() {
    let store = connect().await;
    let key = test_key("window");
    let window = Duration::from_secs(60);

    assert_eq!(store.window_record(&key, "a", 1_000, window).await.unwrap(), 1);
    assert_eq!(store.window_record(&key, "b", 30_000, window).await.unwrap(), 2);
    assert_eq!(store.window_record(&key, "c", 61_500, window).await.unwrap(), 2);

    store.window_forget(&key, "c").await.unwrap();
    assert_eq!(store.window_record(&key, "d", 62_000, window).await.unwrap(), 2);

    store.remove(&key).await.unwrap();
}
