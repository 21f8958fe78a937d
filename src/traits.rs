//! Store and Collaborator Traits
//!
//! This module defines the seams of the cache subsystem:
//!
//! - `KeyValueStore`: the StoreClient contract every backend implements
//! - `CacheCodec`: pluggable serialization for cached records
//! - `SubjectDirectory`: the source of record consulted on a session miss
//! - `TokenVerifier`: opaque bearer-token verification
//!
//! # Example: Custom Store
//!
//! ```rust,ignore
//! use session_cache_guard::{KeyValueStore, async_trait};
//! use std::time::Duration;
//! use anyhow::Result;
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl KeyValueStore for MyStore {
//!     async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> { /* ... */ }
//!     async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> { /* ... */ }
//!     // ...
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

use crate::session::UserAttributes;

/// Trait for cache value serialization/deserialization
///
/// Implementations must be `Send + Sync + Debug` so a codec can be shared
/// by every clone of a cache handle.
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented by this codec.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Get the name of the codec (used for logging)
    fn name(&self) -> &'static str;
}

/// Primitive operations over the external key-value store
///
/// Every method reports transport failures as `Err` so the circuit breaker
/// can count them. An absent key is `Ok(None)`, never an error.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// request task and by the health monitor.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Delete a single key (absent keys are not an error)
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete many keys in one round trip, returning how many existed
    async fn remove_bulk(&self, keys: &[String]) -> Result<usize>;

    /// Collect keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes)
    ///
    /// Implementations must iterate incrementally (cursor-based) and never
    /// block the store with a full keyspace listing.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Record one hit in the sliding window stored at `key`
    ///
    /// Drops hits older than `now_ms - window`, adds `member` scored at
    /// `now_ms`, refreshes the key TTL to `window`, and returns the number of
    /// hits now inside the window (including this one).
    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64>;

    /// Remove a previously recorded hit from the window at `key`
    async fn window_forget(&self, key: &str, member: &str) -> Result<()>;

    /// Lightweight liveness check
    async fn ping(&self) -> Result<()>;

    /// Get the name of this store (used for logging)
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Source of record for user identities, consulted when the session cache misses
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Look up a subject by its identifier
    ///
    /// `Ok(None)` means the subject does not exist.
    async fn fetch_by_subject_id(&self, subject_id: &str) -> Result<Option<UserAttributes>>;

    /// Look up a subject by email, returning its identifier and attributes
    async fn fetch_by_email(&self, email: &str) -> Result<Option<(String, UserAttributes)>>;
}

/// Opaque bearer-token verifier
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the subject identifier it was issued for
    ///
    /// # Errors
    ///
    /// Returns an error for expired, malformed, or forged tokens.
    fn verify_token(&self, token: &str) -> Result<String>;
}
