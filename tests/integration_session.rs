//! Integration tests for the session cache and session-backed authentication

mod common;

use common::*;
use session_cache_guard::session::session_key;
use session_cache_guard::{
    AuthError, CacheError, CacheSubsystemBuilder, SessionSource, SubsystemConfig,
};
use std::sync::Arc;

/// Test that a stored session is returned with every attribute intact
#[tokio::test]
async fn test_store_then_fetch() {
    let (cache, _store) = setup_subsystem().await;
    let attrs = test_data::user(1);

    cache.sessions().store("u1", &attrs).await.unwrap();

    let record = cache.sessions().fetch("u1").await.unwrap();
    assert_eq!(record.subject_id, "u1");
    assert_eq!(record.attributes(), attrs);
    assert_eq!(record.session_token.len(), 44);
}

/// Test that an unavailable cache misses without touching the store
#[tokio::test]
async fn test_unavailable_fetch_does_no_io() {
    let store = CountingStore::new();
    store.set_failing(true);
    let cache = CacheSubsystemBuilder::new(SubsystemConfig::default())
        .with_store(store.clone())
        .without_health_monitor()
        .build()
        .await
        .unwrap();

    // Only the initial probe reached the store
    assert!(!cache.is_available());
    assert_eq!(store.calls(), 1);

    let result = cache.sessions().fetch("u1").await;
    assert!(matches!(result, Err(CacheError::Miss)));
    cache.sessions().store("u1", &test_data::user(1)).await.unwrap();
    assert!(!cache.sessions().invalidate("u1").await);

    assert_eq!(store.calls(), 1);
}

/// Test that a session is gone after invalidation
#[tokio::test]
async fn test_invalidate_then_fetch_misses() {
    let (cache, store) = setup_subsystem().await;
    cache.sessions().store("u1", &test_data::user(1)).await.unwrap();

    assert!(cache.sessions().invalidate("u1").await);
    assert!(!store.inner().contains_key(&session_key("u1")));
    assert!(cache.sessions().fetch("u1").await.unwrap_err().is_miss());
}

/// Test the miss path: source of record answers, cache is filled in the background
#[tokio::test]
async fn test_authenticate_populates_cache_on_miss() {
    let (cache, store) = setup_subsystem().await;
    let directory = StaticDirectory::new();
    directory.insert("u1", test_data::user(1));
    let auth = cache.authenticator(directory.clone(), Arc::new(PrefixVerifier));

    let first = auth.authenticate("Bearer valid:u1").await.unwrap();
    assert_eq!(first.subject_id, "u1");
    assert_eq!(first.source, SessionSource::SourceOfRecord);
    assert_eq!(directory.lookups(), 1);

    let key = session_key("u1");
    assert!(wait_for(|| store.inner().contains_key(&key), 1000).await);

    let second = auth.authenticate("Bearer valid:u1").await.unwrap();
    assert_eq!(second.source, SessionSource::Cache);
    assert_eq!(second.attributes, test_data::user(1));
    assert_eq!(directory.lookups(), 1, "Cache hit must not reach the source of record");
}

/// Test that authentication still works with the cache down
#[tokio::test]
async fn test_authenticate_with_cache_down() {
    let (cache, store) = setup_subsystem().await;
    let directory = StaticDirectory::new();
    directory.insert("u1", test_data::user(1));
    let auth = cache.authenticator(directory.clone(), Arc::new(PrefixVerifier));

    store.set_failing(true);
    for _ in 0..3 {
        let subject = auth.authenticate("Bearer valid:u1").await.unwrap();
        assert_eq!(subject.source, SessionSource::SourceOfRecord);
    }
    assert_eq!(directory.lookups(), 3);
}

/// Test rejection of bad tokens and unknown subjects
#[tokio::test]
async fn test_authenticate_rejections() {
    let (cache, _store) = setup_subsystem().await;
    let directory = StaticDirectory::new();
    let auth = cache.authenticator(directory.clone(), Arc::new(PrefixVerifier));

    assert_eq!(auth.authenticate("").await, Err(AuthError::Unauthenticated));
    assert_eq!(auth.authenticate("Bearer forged").await, Err(AuthError::Unauthenticated));
    assert_eq!(auth.authenticate("Bearer valid:ghost").await, Err(AuthError::Unauthenticated));

    directory.insert("u2", test_data::user(2));
    directory.set_unavailable(true);
    assert_eq!(auth.authenticate("Bearer valid:u2").await, Err(AuthError::Unauthenticated));
}

/// Test that login writes the session synchronously and returns its token
#[tokio::test]
async fn test_establish_session() {
    let (cache, store) = setup_subsystem().await;
    let directory = StaticDirectory::new();
    directory.insert("u7", test_data::user(7));
    let auth = cache.authenticator(directory, Arc::new(PrefixVerifier));

    let record = auth.establish_session("user7@example.com").await.unwrap();
    assert_eq!(record.subject_id, "u7");
    assert!(store.inner().contains_key(&session_key("u7")));

    let cached = cache.sessions().fetch("u7").await.unwrap();
    assert_eq!(cached.session_token, record.session_token);

    assert_eq!(
        auth.establish_session("nobody@example.com").await,
        Err(AuthError::Unauthenticated)
    );
}

/// Test that login still yields a token while the cache is down
#[tokio::test]
async fn test_establish_session_with_cache_down() {
    let (cache, store) = setup_subsystem().await;
    let directory = StaticDirectory::new();
    directory.insert("u7", test_data::user(7));
    let auth = cache.authenticator(directory, Arc::new(PrefixVerifier));

    store.set_failing(true);
    let record = auth.establish_session("user7@example.com").await.unwrap();
    assert_eq!(record.session_token.len(), 44);
    assert!(!store.inner().contains_key(&session_key("u7")));
}

/// Test that a role change replaces the token
#[tokio::test]
async fn test_role_change_rotates_session() {
    let (cache, _store) = setup_subsystem().await;
    cache.sessions().store("u1", &test_data::user(1)).await.unwrap();
    let before = cache.sessions().fetch("u1").await.unwrap();

    let token = cache
        .sessions()
        .refresh_after_update("u1", &test_data::admin(1), true)
        .await
        .unwrap()
        .unwrap();

    let after = cache.sessions().fetch("u1").await.unwrap();
    assert_ne!(token, before.session_token);
    assert_eq!(after.session_token, token);
    assert_eq!(after.role, "admin");
}

/// Test that a non-role update only drops the cached session
#[tokio::test]
async fn test_profile_update_invalidates_only() {
    let (cache, _store) = setup_subsystem().await;
    cache.sessions().store("u1", &test_data::user(1)).await.unwrap();

    let token = cache
        .sessions()
        .refresh_after_update("u1", &test_data::user(1), false)
        .await
        .unwrap();

    assert!(token.is_none());
    assert!(cache.sessions().fetch("u1").await.unwrap_err().is_miss());
}
