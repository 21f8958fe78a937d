//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - A call-counting, failure-injecting store over `MemoryStore`
//! - Subsystem setup helpers
//! - Source-of-record and token verifier doubles
//! - Polling helpers

#![allow(dead_code)]

use anyhow::{Result, bail};
use parking_lot::Mutex;
use session_cache_guard::{
    CacheSubsystem, CacheSubsystemBuilder, KeyValueStore, MemoryStore, SubjectDirectory,
    SubsystemConfig, TokenVerifier, UserAttributes, async_trait,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Store wrapper that counts every transport call and can be told to fail
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    failing: AtomicBool,
    failing_prefix: Mutex<Option<String>>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport calls made so far (including pings)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail every call while `failing` is set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only calls whose key or pattern starts with `prefix`
    pub fn fail_keys_with_prefix(&self, prefix: &str) {
        *self.failing_prefix.lock() = Some(prefix.to_string());
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        if let Some(prefix) = self.failing_prefix.lock().as_deref() {
            if key.starts_with(prefix) {
                bail!("injected failure for {key}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.check(key)?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.inner.remove(key).await
    }

    async fn remove_bulk(&self, keys: &[String]) -> Result<usize> {
        self.check(keys.first().map_or("", String::as_str))?;
        self.inner.remove_bulk(keys).await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check(pattern)?;
        self.inner.scan_keys(pattern).await
    }

    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64> {
        self.check(key)?;
        self.inner.window_record(key, member, now_ms, window).await
    }

    async fn window_forget(&self, key: &str, member: &str) -> Result<()> {
        self.check(key)?;
        self.inner.window_forget(key, member).await
    }

    async fn ping(&self) -> Result<()> {
        self.check("")?;
        self.inner.ping().await
    }

    fn name(&self) -> &'static str {
        "Counting"
    }
}

/// Subsystem over a fresh counting store, without the background monitor
pub async fn setup_subsystem() -> (CacheSubsystem, Arc<CountingStore>) {
    setup_subsystem_with(SubsystemConfig::default()).await
}

/// Subsystem over a fresh counting store with custom configuration
pub async fn setup_subsystem_with(config: SubsystemConfig) -> (CacheSubsystem, Arc<CountingStore>) {
    let store = CountingStore::new();
    let cache = CacheSubsystemBuilder::new(config)
        .with_store(store.clone())
        .without_health_monitor()
        .build()
        .await
        .unwrap();
    (cache, store)
}

/// In-memory source of record
#[derive(Default)]
pub struct StaticDirectory {
    users: Mutex<HashMap<String, UserAttributes>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, subject_id: &str, attributes: UserAttributes) {
        self.users.lock().insert(subject_id.to_string(), attributes);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubjectDirectory for StaticDirectory {
    async fn fetch_by_subject_id(&self, subject_id: &str) -> Result<Option<UserAttributes>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        Ok(self.users.lock().get(subject_id).cloned())
    }

    async fn fetch_by_email(&self, email: &str) -> Result<Option<(String, UserAttributes)>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        Ok(self
            .users
            .lock()
            .iter()
            .find(|(_, attrs)| attrs.email == email)
            .map(|(id, attrs)| (id.clone(), attrs.clone())))
    }
}

/// Accepts tokens of the form `valid:{subject_id}`
pub struct PrefixVerifier;

impl TokenVerifier for PrefixVerifier {
    fn verify_token(&self, token: &str) -> Result<String> {
        match token.strip_prefix("valid:") {
            Some(subject) if !subject.is_empty() => Ok(subject.to_string()),
            _ => bail!("invalid token"),
        }
    }
}

/// Generate test data
pub mod test_data {
    use session_cache_guard::UserAttributes;

    pub fn user(id: u64) -> UserAttributes {
        UserAttributes {
            name: format!("User {id}"),
            email: format!("user{id}@example.com"),
            role: "user".to_string(),
            email_verified: true,
        }
    }

    pub fn admin(id: u64) -> UserAttributes {
        UserAttributes {
            role: "admin".to_string(),
            ..user(id)
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    use tokio::time::{Duration, sleep};

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }

    #[test]
    fn test_prefix_verifier() {
        assert_eq!(PrefixVerifier.verify_token("valid:u1").unwrap(), "u1");
        assert!(PrefixVerifier.verify_token("forged").is_err());
    }
}
