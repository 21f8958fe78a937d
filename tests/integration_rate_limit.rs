//! Integration tests for sliding-window admission control

mod common;

use common::*;
use session_cache_guard::config::RateLimiterConfig;
use session_cache_guard::{CacheError, RequestContext, SubsystemConfig};
use std::time::{Duration, SystemTime};

fn limited_config(max: u64, skip_successful: bool) -> SubsystemConfig {
    SubsystemConfig {
        rate_limiter: RateLimiterConfig {
            default_max: max,
            auth_max: max,
            default_window: Duration::from_secs(60),
            auth_window: Duration::from_secs(60),
            skip_successful_requests: skip_successful,
            ..RateLimiterConfig::default()
        },
        ..SubsystemConfig::default()
    }
}

/// Test that the request after the limit is rejected with a retry hint
#[tokio::test]
async fn test_rejects_after_limit() {
    let (cache, _store) = setup_subsystem_with(limited_config(5, false)).await;
    let req = RequestContext::new("GET", "/users").with_client_addr("10.0.0.1");

    for i in 0..5u64 {
        let ticket = cache.admit(&req).await.unwrap().unwrap();
        assert_eq!(ticket.remaining, 4 - i);
    }

    match cache.admit(&req).await {
        Err(CacheError::AdmissionRejected { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(60));
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    // A different client has its own window
    let other = RequestContext::new("GET", "/users").with_client_addr("10.0.0.2");
    assert!(cache.admit(&other).await.is_ok());
}

/// Test that authenticated requests are keyed by subject, not address
#[tokio::test]
async fn test_subject_identity_takes_precedence() {
    let (cache, _store) = setup_subsystem_with(limited_config(2, false)).await;
    let alice = RequestContext::new("GET", "/me")
        .with_client_addr("10.0.0.1")
        .with_subject("alice");
    let bob = RequestContext::new("GET", "/me")
        .with_client_addr("10.0.0.1")
        .with_subject("bob");

    assert_eq!(cache.admit(&alice).await.unwrap().unwrap().key, "rate_limit:user:alice");
    cache.admit(&alice).await.unwrap();
    assert!(cache.admit(&alice).await.is_err());

    assert!(cache.admit(&bob).await.is_ok(), "Shared address must not share a window");
}

/// Test that the window slides instead of resetting on a fixed boundary
#[tokio::test]
async fn test_window_slides() {
    let (cache, _store) = setup_subsystem_with(limited_config(2, false)).await;
    let limiter = cache.rate_limiter().unwrap();
    let req = RequestContext::new("GET", "/users").with_client_addr("10.0.0.9");
    let t0 = SystemTime::now();

    limiter.admit_at(&req, t0).await.unwrap();
    limiter.admit_at(&req, t0 + Duration::from_secs(30)).await.unwrap();
    assert!(limiter.admit_at(&req, t0 + Duration::from_secs(45)).await.is_err());

    // The first hit has left the window; the second is still inside it
    limiter.admit_at(&req, t0 + Duration::from_secs(61)).await.unwrap();
    assert!(limiter.admit_at(&req, t0 + Duration::from_secs(62)).await.is_err());
}

/// Test that successful responses give their slot back
#[tokio::test]
async fn test_successful_requests_are_skipped() {
    let (cache, _store) = setup_subsystem_with(limited_config(2, true)).await;
    let req = RequestContext::new("POST", "/login").with_client_addr("10.0.0.3");

    for _ in 0..10 {
        let ticket = cache.admit(&req).await.unwrap();
        cache.complete(ticket.as_ref(), 200).await;
    }

    let failed = cache.admit(&req).await.unwrap();
    cache.complete(failed.as_ref(), 401).await;
    let failed = cache.admit(&req).await.unwrap();
    cache.complete(failed.as_ref(), 401).await;
    assert!(cache.admit(&req).await.is_err());
}

/// Test that the limiter admits everything while the store is down
#[tokio::test]
async fn test_fails_open_when_store_down() {
    let (cache, store) = setup_subsystem_with(limited_config(1, false)).await;
    let req = RequestContext::new("GET", "/users").with_client_addr("10.0.0.4");
    store.set_failing(true);

    for _ in 0..10 {
        let ticket = cache.admit(&req).await.unwrap().unwrap();
        assert!(!ticket.is_recorded());
    }
}

/// Test that the first proxy hop identifies the client
#[tokio::test]
async fn test_forwarded_client_address() {
    let (cache, _store) = setup_subsystem_with(limited_config(1, false)).await;
    let headers = [("x-forwarded-for", "203.0.113.7, 10.0.0.1")];
    let req = RequestContext::new("GET", "/users")
        .with_client_addr("10.0.0.1")
        .with_headers(&headers);

    let ticket = cache.admit(&req).await.unwrap().unwrap();
    assert_eq!(ticket.key, "rate_limit:ip:203.0.113.7");

    let direct = RequestContext::new("GET", "/users").with_client_addr("10.0.0.1");
    assert!(cache.admit(&direct).await.is_ok());
}

/// Test that a disabled limiter admits without consulting the store
#[tokio::test]
async fn test_disabled_limiter() {
    let mut config = limited_config(1, false);
    config.rate_limiter.enabled = false;
    let (cache, store) = setup_subsystem_with(config).await;
    let calls = store.calls();

    let req = RequestContext::new("GET", "/users").with_client_addr("10.0.0.5");
    for _ in 0..5 {
        assert!(cache.admit(&req).await.unwrap().is_none());
    }
    assert_eq!(store.calls(), calls);
}
