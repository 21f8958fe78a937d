//! Cache facade: the single guarded entry point to the store
//!
//! Every higher layer reaches the network only through
//! [`CacheFacade::execute_guarded`], which composes the store, the circuit
//! breaker and a per-call deadline. A facade built with
//! [`CacheFacade::disabled`] represents a subsystem with no store configured
//! and fails every call with [`CacheError::Unavailable`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::availability::AvailabilityFlag;
use crate::circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
use crate::error::{CacheError, CacheResult};
use crate::traits::KeyValueStore;

/// Guarded call counters
#[derive(Debug, Default)]
struct FacadeCounters {
    calls: AtomicU64,
    short_circuited: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of facade counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FacadeStats {
    /// Calls that reached the store
    pub calls: u64,
    /// Calls rejected by the breaker or a disabled facade
    pub short_circuited: u64,
    /// Calls that failed or timed out
    pub failures: u64,
}

struct FacadeInner {
    store: Arc<dyn KeyValueStore>,
    breaker: Arc<CircuitBreaker>,
    availability: Arc<AvailabilityFlag>,
    deadline: Duration,
    counters: FacadeCounters,
}

/// Shared handle over store + breaker + availability flag
#[derive(Clone)]
pub struct CacheFacade {
    inner: Option<Arc<FacadeInner>>,
}

impl CacheFacade {
    /// Compose a live facade
    ///
    /// `deadline` bounds every guarded call; a call that exceeds it counts as
    /// a breaker failure.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        breaker: Arc<CircuitBreaker>,
        availability: Arc<AvailabilityFlag>,
        deadline: Duration,
    ) -> Self {
        Self {
            inner: Some(Arc::new(FacadeInner {
                store,
                breaker,
                availability,
                deadline,
                counters: FacadeCounters::default(),
            })),
        }
    }

    /// A facade with no store behind it
    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Whether a store is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// `true` only if the availability flag is set and the breaker is not open
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| {
            inner.availability.get() && inner.breaker.state() != CircuitState::Open
        })
    }

    /// Breaker state, `None` when disabled
    #[must_use]
    pub fn breaker_state(&self) -> Option<CircuitState> {
        self.inner.as_ref().map(|inner| inner.breaker.state())
    }

    /// Name of the underlying store
    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.inner.as_ref().map_or("disabled", |inner| inner.store.name())
    }

    /// Run `operation` against the store under breaker protection
    ///
    /// The operation receives a handle to the store. Dropping the returned
    /// future aborts the in-flight store call.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Unavailable`] if the facade is disabled or the breaker
    ///   rejected the call (the operation is not invoked)
    /// - [`CacheError::Timeout`] if the call exceeded the deadline
    /// - [`CacheError::Store`] if the operation failed
    pub async fn execute_guarded<T, F, Fut>(&self, operation: F) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn KeyValueStore>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(inner) = self.inner.as_ref() else {
            return Err(CacheError::Unavailable);
        };

        let store = inner.store.clone();
        let deadline = inner.deadline;
        let result = inner
            .breaker
            .call(|| async move {
                match tokio::time::timeout(deadline, operation(store)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(CacheError::Store(e)),
                    Err(_) => Err(CacheError::Timeout(deadline)),
                }
            })
            .await;

        match result {
            Ok(value) => {
                inner.counters.calls.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(BreakerError::Open) => {
                inner.counters.short_circuited.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Unavailable)
            }
            Err(BreakerError::OperationFailed(e)) => {
                inner.counters.calls.fetch_add(1, Ordering::Relaxed);
                inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                debug!(store = inner.store.name(), error = %e, "Guarded cache call failed");
                Err(e)
            }
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> FacadeStats {
        self.inner
            .as_ref()
            .map(|inner| FacadeStats {
                calls: inner.counters.calls.load(Ordering::Relaxed),
                short_circuited: inner.counters.short_circuited.load(Ordering::Relaxed),
                failures: inner.counters.failures.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFacade")
            .field("store", &self.store_name())
            .field("available", &self.is_available())
            .finish()
    }
}
