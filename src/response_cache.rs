//! HTTP response cache policy
//!
//! Decides which requests may be served from the cache, under which key, and
//! which responses may be stored. Only `GET` and `HEAD` are cacheable, paths
//! on the deny-list always bypass, and error responses are never stored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::ResponseCacheConfig;
use crate::facade::CacheFacade;
use crate::keygen::{derive_key, derive_user_scoped_key, is_cache_exempt};
use crate::request::RequestContext;

/// Header reporting the cache outcome to the client
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Request is not cacheable; no header is set
    Bypass,
    /// Cached body found
    Hit { key: String, body: Vec<u8> },
    /// Cacheable but absent; store the response under `key` afterwards
    Miss { key: String },
    /// Cacheable but the store could not be reached
    Unreachable { key: String },
}

impl CacheLookup {
    /// Value for the [`CACHE_STATUS_HEADER`] header, `None` on bypass
    #[must_use]
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Self::Bypass => None,
            Self::Hit { .. } => Some("hit"),
            Self::Miss { .. } => Some("miss"),
            Self::Unreachable { .. } => Some("unreachable"),
        }
    }

    /// Key to store the computed response under, if any
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Bypass => None,
            Self::Hit { key, .. } | Self::Miss { key } | Self::Unreachable { key } => Some(key),
        }
    }
}

/// Snapshot of response cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub unreachable: u64,
    pub stores: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    unreachable: AtomicU64,
    stores: AtomicU64,
}

/// Response cache over the guarded facade
#[derive(Clone)]
pub struct ResponseCache {
    facade: CacheFacade,
    ttl: Duration,
    scope_by_subject: bool,
    counters: Arc<Counters>,
}

impl ResponseCache {
    pub fn new(facade: CacheFacade, config: &ResponseCacheConfig) -> Self {
        Self {
            facade,
            ttl: config.ttl,
            scope_by_subject: config.scope_by_subject,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Cache key for a request, `None` when the request must bypass the cache
    #[must_use]
    pub fn cache_key(&self, request: &RequestContext<'_>) -> Option<String> {
        let cacheable_method = request.method.eq_ignore_ascii_case("GET")
            || request.method.eq_ignore_ascii_case("HEAD");
        if !cacheable_method || is_cache_exempt(request.path) {
            return None;
        }

        Some(match request.subject().filter(|_| self.scope_by_subject) {
            Some(subject) => {
                derive_user_scoped_key(request.method, request.path, request.raw_query, subject)
            }
            None => derive_key(request.method, request.path, request.raw_query),
        })
    }

    /// Look a request up in the cache
    pub async fn lookup(&self, request: &RequestContext<'_>) -> CacheLookup {
        let Some(key) = self.cache_key(request) else {
            return CacheLookup::Bypass;
        };

        if !self.facade.is_available() {
            self.counters.unreachable.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Unreachable { key };
        }

        let result = self
            .facade
            .execute_guarded(|store| {
                let key = key.clone();
                async move { store.get(&key).await }
            })
            .await;

        match result {
            Ok(Some(body)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Response cache hit");
                CacheLookup::Hit { key, body }
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss { key }
            }
            Err(e) => {
                self.counters.unreachable.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, error = %e, "Response cache unreachable");
                CacheLookup::Unreachable { key }
            }
        }
    }

    /// Store a computed response after a miss
    ///
    /// Responses with status >= 400 are never stored. Returns whether the
    /// body was written; failures are swallowed.
    pub async fn store(&self, key: &str, status: u16, body: &[u8]) -> bool {
        if status >= 400 || !self.facade.is_available() {
            return false;
        }

        let ttl = self.ttl;
        match self
            .facade
            .execute_guarded(|store| async move { store.set_with_ttl(key, body, ttl).await })
            .await
        {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to store response");
                false
            }
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            unreachable: self.counters.unreachable.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("scope_by_subject", &self.scope_by_subject)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
