//! Cache Subsystem Builder
//!
//! Wires store, circuit breaker, availability flag and health monitor into a
//! [`CacheSubsystem`].
//!
//! # Example: Default Store From Configuration
//!
//! ```rust,no_run
//! use session_cache_guard::{CacheSubsystemBuilder, SubsystemConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSubsystemBuilder::new(SubsystemConfig::from_env())
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Store
//!
//! ```rust,ignore
//! use session_cache_guard::{CacheSubsystemBuilder, SubsystemConfig};
//! use std::sync::Arc;
//!
//! let cache = CacheSubsystemBuilder::new(SubsystemConfig::default())
//!     .with_store(Arc::new(MyStore::new()))
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;
use tracing::{info, warn};

use crate::CacheSubsystem;
use crate::availability::AvailabilityFlag;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::SubsystemConfig;
use crate::error::CacheResult;
use crate::facade::CacheFacade;
use crate::health_monitor::HealthMonitor;
use crate::invalidation::Invalidator;
use crate::rate_limiter::RateLimiter;
use crate::response_cache::ResponseCache;
use crate::session::SessionCache;
use crate::traits::KeyValueStore;

/// Builder for [`CacheSubsystem`]
///
/// # Default Behavior
///
/// Without [`CacheSubsystemBuilder::with_store`], the builder connects to
/// Redis when the configuration enables it. A failed connection is logged and
/// the subsystem runs in source-of-record-only mode: every cache read misses,
/// every write is a no-op, and the response cache and rate limiter are off.
pub struct CacheSubsystemBuilder {
    config: SubsystemConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    start_monitor: bool,
}

impl CacheSubsystemBuilder {
    #[must_use]
    pub fn new(config: SubsystemConfig) -> Self {
        Self {
            config,
            store: None,
            start_monitor: true,
        }
    }

    /// Use a custom store instead of connecting to Redis
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Skip the background probe loop (the initial probe still runs)
    #[must_use]
    pub fn without_health_monitor(mut self) -> Self {
        self.start_monitor = false;
        self
    }

    /// Build the subsystem
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConfigurationInvalid`](crate::CacheError::ConfigurationInvalid)
    /// if the store configuration is malformed. Connection failures are not
    /// errors.
    pub async fn build(self) -> CacheResult<CacheSubsystem> {
        let Self {
            config,
            store,
            start_monitor,
        } = self;
        config.validate()?;

        let store = match store {
            Some(store) => Some(store),
            None => connect_configured_store(&config).await,
        };

        let availability = Arc::new(AvailabilityFlag::new());
        let (facade, monitor) = match store {
            Some(store) => {
                let breaker = Arc::new(CircuitBreaker::new(store.name(), config.breaker));
                let flag = Arc::clone(&availability);
                breaker.on_transition(move |_, to| match to {
                    CircuitState::Open => {
                        flag.set(false, "circuit_breaker");
                    }
                    CircuitState::Closed => {
                        flag.set(true, "circuit_breaker");
                    }
                    CircuitState::HalfOpen => {}
                });

                let facade = CacheFacade::new(
                    Arc::clone(&store),
                    breaker,
                    Arc::clone(&availability),
                    config.redis.operation_deadline(),
                );

                let monitor = HealthMonitor::new(store, Arc::clone(&availability), config.health);
                if !monitor.probe_once().await {
                    warn!("Initial cache probe failed, starting unavailable");
                }
                if start_monitor {
                    // Detached: stopped through `CacheSubsystem::shutdown`
                    drop(monitor.start());
                }
                (facade, Some(Arc::new(monitor)))
            }
            None => (CacheFacade::disabled(), None),
        };

        let sessions = SessionCache::new(facade.clone(), config.session.ttl);
        let invalidator = Invalidator::new(facade.clone());
        let response_cache = (config.response_cache.enabled && facade.is_enabled())
            .then(|| ResponseCache::new(facade.clone(), &config.response_cache));
        let rate_limiter = (config.rate_limiter.enabled && facade.is_enabled())
            .then(|| RateLimiter::new(facade.clone(), &config.rate_limiter));

        info!(
            store = facade.store_name(),
            available = facade.is_available(),
            session_ttl_minutes = config.session.ttl_minutes(),
            response_cache = response_cache.is_some(),
            rate_limiter = rate_limiter.is_some(),
            "Cache subsystem initialized"
        );

        Ok(CacheSubsystem {
            facade,
            availability,
            sessions,
            invalidator,
            response_cache,
            rate_limiter,
            monitor,
            config: Arc::new(config),
        })
    }
}

#[cfg(feature = "redis")]
async fn connect_configured_store(config: &SubsystemConfig) -> Option<Arc<dyn KeyValueStore>> {
    if !config.redis.enabled {
        info!("Redis not configured, running in source-of-record-only mode");
        return None;
    }
    match crate::backends::RedisStore::connect(&config.redis).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis, running in source-of-record-only mode");
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_configured_store(config: &SubsystemConfig) -> Option<Arc<dyn KeyValueStore>> {
    if config.redis.enabled {
        warn!("Redis configured but the `redis` feature is disabled, running in source-of-record-only mode");
    }
    None
}
