//! Pattern-based cache invalidation
//!
//! Matching keys are collected with the store's cursor-based `SCAN` (never a
//! blocking full keyspace listing) and removed with one bulk delete.
//! Invalidation is best-effort: a failure never rolls back the mutation that
//! triggered it, and the user-level entry point never propagates errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::CacheResult;
use crate::facade::CacheFacade;
use crate::keygen::{RESPONSE_KEY_PREFIX, escape_glob};
use crate::session::SESSION_KEY_PREFIX;

/// Pattern matching a subject's session record
#[must_use]
pub fn session_pattern(subject_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{}", escape_glob(subject_id))
}

/// Pattern matching every response cached for a subject
#[must_use]
pub fn user_response_pattern(subject_id: &str) -> String {
    format!("{RESPONSE_KEY_PREFIX}*:user:{}:*", escape_glob(subject_id))
}

/// Statistics for invalidation operations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Pattern passes attempted
    pub patterns_run: u64,
    /// Keys deleted across all passes
    pub keys_removed: u64,
    /// Passes that failed during scan or delete
    pub failures: u64,
}

/// Thread-safe statistics for invalidation operations
#[derive(Debug, Default)]
struct AtomicInvalidationStats {
    patterns_run: AtomicU64,
    keys_removed: AtomicU64,
    failures: AtomicU64,
}

impl AtomicInvalidationStats {
    fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            patterns_run: self.patterns_run.load(Ordering::Relaxed),
            keys_removed: self.keys_removed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Deletes cache entries that no longer reflect the source of record
#[derive(Clone)]
pub struct Invalidator {
    facade: CacheFacade,
    stats: Arc<AtomicInvalidationStats>,
}

impl Invalidator {
    pub fn new(facade: CacheFacade) -> Self {
        Self {
            facade,
            stats: Arc::new(AtomicInvalidationStats::default()),
        }
    }

    /// Delete every key matching a glob pattern
    ///
    /// Returns the number of keys removed. Zero matches, or a subsystem with
    /// no store configured, is `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns the scan error, or the bulk delete error. Keys already deleted
    /// stay deleted.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> CacheResult<usize> {
        if !self.facade.is_enabled() {
            return Ok(0);
        }
        self.stats.patterns_run.fetch_add(1, Ordering::Relaxed);

        let scan = self
            .facade
            .execute_guarded(|store| {
                let pattern = pattern.to_string();
                async move { store.scan_keys(&pattern).await }
            })
            .await;
        let keys = match scan {
            Ok(keys) => keys,
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if keys.is_empty() {
            debug!(pattern = %pattern, "No cache keys matched pattern");
            return Ok(0);
        }

        let removed = self
            .facade
            .execute_guarded(|store| async move { store.remove_bulk(&keys).await })
            .await
            .inspect_err(|_| {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
            })?;

        self.stats
            .keys_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(pattern = %pattern, count = removed, "Invalidated cache keys matching pattern");
        Ok(removed)
    }

    /// Delete a subject's session record
    ///
    /// # Errors
    ///
    /// Same as [`Invalidator::invalidate_by_pattern`].
    pub async fn invalidate_session_cache(&self, subject_id: &str) -> CacheResult<usize> {
        let pattern = session_pattern(subject_id);
        info!(subject_id = %subject_id, pattern = %pattern, "Invalidating session cache");
        self.invalidate_by_pattern(&pattern).await
    }

    /// Delete a subject's session and every response cached for them
    ///
    /// Both passes are attempted even if the first fails. Failures are
    /// logged and never returned; the result is the number of keys removed.
    pub async fn invalidate_user_related_cache(&self, subject_id: &str) -> usize {
        info!(subject_id = %subject_id, "Invalidating all cache for subject (session + API response)");

        let sessions = self
            .invalidate_session_cache(subject_id)
            .await
            .unwrap_or_else(|e| {
                warn!(subject_id = %subject_id, error = %e, "Failed to invalidate session cache");
                0
            });

        let responses = self
            .invalidate_by_pattern(&user_response_pattern(subject_id))
            .await
            .unwrap_or_else(|e| {
                warn!(subject_id = %subject_id, error = %e, "Failed to invalidate API response cache");
                0
            });

        sessions + responses
    }

    /// Get a snapshot of current statistics
    #[must_use]
    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invalidator")
            .field("facade", &self.facade)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
