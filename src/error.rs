//! Error taxonomy for the cache subsystem
//!
//! Every failure inside the cache layer is a [`CacheError`]. Only two variants
//! are meant to reach the business layer: [`CacheError::AdmissionRejected`]
//! (the rate limiter denied the request) and [`CacheError::ConfigurationInvalid`]
//! (fatal at startup). Everything else is swallowed at the subsystem boundary
//! and turned into a fallback to the source of record.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache subsystem
#[derive(Debug, Error)]
pub enum CacheError {
    /// Store unreachable, subsystem disabled, or circuit breaker open
    #[error("cache backend unavailable")]
    Unavailable,

    /// Key absent, or any read failure collapsed into a miss
    #[error("cache miss")]
    Miss,

    /// A value could not be encoded or decoded
    #[error("cache serialization failed: {0}")]
    Serialization(#[source] anyhow::Error),

    /// Rate limit exceeded for the request identity
    #[error("too many requests, retry after {}s", .retry_after.as_secs())]
    AdmissionRejected {
        /// Hint for the `Retry-After` header
        retry_after: Duration,
    },

    /// Malformed configuration detected at startup
    #[error("invalid cache configuration: {0}")]
    ConfigurationInvalid(String),

    /// A store round trip exceeded its deadline
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store reported an error
    #[error("cache store error: {0}")]
    Store(#[from] anyhow::Error),

    /// The operating system entropy source failed
    #[error("entropy source failure: {0}")]
    Entropy(String),
}

impl CacheError {
    /// Whether callers should degrade silently instead of surfacing this error
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        !matches!(
            self,
            Self::AdmissionRejected { .. } | Self::ConfigurationInvalid(_)
        )
    }

    /// `true` for [`CacheError::Miss`]
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}
