//! Session Cache Guard
//!
//! An availability-aware cache layer for web backends that front a slower
//! source of record with Redis:
//! - **Circuit Breaker**: stops calling a failing store, probes recovery after a cooldown
//! - **Health Monitor**: background `PING` loop driving an edge-triggered availability flag
//! - **Session Cache**: opaque session tokens and cached identity records with TTL
//! - **Response Keys**: canonical, order-independent cache keys for HTTP responses
//! - **Invalidation**: `SCAN`-based pattern deletion when the source of record changes
//! - **Rate Limiting**: sliding-window admission keyed by subject or client address
//!
//! Every cache failure degrades to the source of record. Only a rate-limit
//! rejection or a malformed configuration is ever surfaced as an error.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use session_cache_guard::{CacheSubsystem, SubsystemConfig, UserAttributes};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSubsystem::new(SubsystemConfig::from_env()).await?;
//!
//!     let attrs = UserAttributes {
//!         name: "Alice".into(),
//!         email: "alice@example.com".into(),
//!         role: "user".into(),
//!         email_verified: true,
//!     };
//!     cache.sessions().store("u1", &attrs).await?;
//!
//!     match cache.sessions().fetch("u1").await {
//!         Ok(record) => tracing::info!(role = %record.role, "Session from cache"),
//!         Err(_) => tracing::info!("Cache miss, load from the source of record"),
//!     }
//!
//!     cache.invalidator().invalidate_user_related_cache("u1").await;
//!     cache.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! request → RateLimiter → ResponseCache ─hit→ response
//!                             └─miss→ handler → Invalidator / SessionCache
//!                                          │
//!                       CacheFacade (breaker + deadline) → KeyValueStore
//!                                          ▲
//!                 HealthMonitor ── AvailabilityFlag ◀── breaker transitions
//! ```

use std::sync::Arc;

pub mod auth;
pub mod availability;
pub mod backends;
pub mod builder;
pub mod circuit_breaker;
pub mod codecs;
pub mod config;
pub mod error;
pub mod facade;
pub mod health_monitor;
pub mod invalidation;
pub mod keygen;
pub mod rate_limiter;
pub mod request;
pub mod response_cache;
pub mod session;
pub mod telemetry;
pub mod traits;

pub use auth::{AuthError, AuthenticatedSubject, SessionAuthenticator, SessionSource};
pub use availability::AvailabilityFlag;
pub use backends::MemoryStore;
#[cfg(feature = "redis")]
pub use backends::RedisStore;
pub use builder::CacheSubsystemBuilder;
pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use codecs::JsonCodec;
pub use config::SubsystemConfig;
pub use error::{CacheError, CacheResult};
pub use facade::{CacheFacade, FacadeStats};
pub use health_monitor::HealthMonitor;
pub use invalidation::{InvalidationStats, Invalidator};
pub use keygen::{derive_key, is_cache_exempt};
pub use rate_limiter::{AdmissionTicket, RateLimiter};
pub use request::RequestContext;
pub use response_cache::{CACHE_STATUS_HEADER, CacheLookup, ResponseCache};
pub use session::{SessionCache, SessionRecord, UserAttributes, new_session_token};
pub use traits::{CacheCodec, KeyValueStore, SubjectDirectory, TokenVerifier};

// Re-export async_trait for user convenience
pub use async_trait::async_trait;

/// The cache subsystem: one explicitly constructed instance shared by all collaborators
///
/// Cloning is cheap; every clone shares the same store, breaker and
/// availability state. Independent instances (e.g. in tests) share nothing.
///
/// # Example
///
/// ```rust,no_run
/// use session_cache_guard::{CacheSubsystem, SubsystemConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let cache = CacheSubsystem::new(SubsystemConfig::from_env()).await?;
///     if !cache.is_available() {
///         tracing::warn!("Serving from the source of record only");
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CacheSubsystem {
    pub(crate) facade: CacheFacade,
    pub(crate) availability: Arc<AvailabilityFlag>,
    pub(crate) sessions: SessionCache,
    pub(crate) invalidator: Invalidator,
    pub(crate) response_cache: Option<ResponseCache>,
    pub(crate) rate_limiter: Option<RateLimiter>,
    pub(crate) monitor: Option<Arc<HealthMonitor>>,
    pub(crate) config: Arc<SubsystemConfig>,
}

impl CacheSubsystem {
    /// Build from configuration with the default store
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConfigurationInvalid`] for malformed store settings.
    pub async fn new(config: SubsystemConfig) -> CacheResult<Self> {
        CacheSubsystemBuilder::new(config).build().await
    }

    /// Guarded store access
    #[must_use]
    pub fn facade(&self) -> &CacheFacade {
        &self.facade
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    #[must_use]
    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    /// `None` when response caching is disabled or no store is configured
    #[must_use]
    pub fn response_cache(&self) -> Option<&ResponseCache> {
        self.response_cache.as_ref()
    }

    /// `None` when rate limiting is disabled or no store is configured
    #[must_use]
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    /// Whether guarded calls will currently reach the store
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.facade.is_available()
    }

    /// Register a callback fired once per availability edge
    pub fn on_availability_change<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.availability.subscribe(listener);
    }

    /// Run admission control for a request
    ///
    /// Returns `Ok(None)` when the rate limiter is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::AdmissionRejected`] when the request must be refused.
    pub async fn admit(&self, request: &RequestContext<'_>) -> CacheResult<Option<AdmissionTicket>> {
        match &self.rate_limiter {
            Some(limiter) => limiter.admit(request).await.map(Some),
            None => Ok(None),
        }
    }

    /// Report the final status of an admitted request
    pub async fn complete(&self, ticket: Option<&AdmissionTicket>, status: u16) {
        if let (Some(limiter), Some(ticket)) = (&self.rate_limiter, ticket) {
            limiter.complete(ticket, status).await;
        }
    }

    /// Authenticator that consults this subsystem's session cache first
    pub fn authenticator(
        &self,
        directory: Arc<dyn SubjectDirectory>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> SessionAuthenticator {
        SessionAuthenticator::new(self.sessions.clone(), directory, verifier)
    }

    /// Stop the background health monitor
    pub fn shutdown(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.shutdown();
        }
    }
}

impl std::fmt::Debug for CacheSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSubsystem")
            .field("facade", &self.facade)
            .field("response_cache", &self.response_cache.is_some())
            .field("rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}
