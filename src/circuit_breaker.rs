//! Circuit Breaker
//!
//! Guards every store round trip. Three states:
//!
//! - **Closed**: calls pass through, consecutive failures are counted
//! - **Open**: calls fail immediately for a cooldown window
//! - **Half-open**: a bounded number of trial calls decide between closing
//!   again and reopening
//!
//! All state lives in atomics so no request path ever waits on a lock owned
//! by another request. Open→half-open happens lazily: the first caller that
//! observes an expired cooldown performs the transition.

use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::BreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failing fast - calls are rejected without touching the store
    Open = 1,
    /// Testing recovery - a limited number of trial calls are allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            2 => Self::HalfOpen,
            // Unknown values map to the safest state
            _ => Self::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Errors returned by [`CircuitBreaker::call`]
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without running it
    #[error("circuit breaker is open")]
    Open,

    /// The operation ran and failed (the failure was recorded)
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Callback invoked as `(from, to)` after every state transition
pub type TransitionListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Lock-free circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_requests: AtomicU32,
    half_open_successes: AtomicU32,
    /// Milliseconds since `epoch` when the breaker last opened
    opened_at_ms: AtomicU64,
    /// Milliseconds since `epoch` when closed-state counters next reset
    counts_expire_ms: AtomicU64,
    /// Bumped on every transition; results from an older generation are ignored
    generation: AtomicU64,
    epoch: Instant,
    listeners: RwLock<Vec<TransitionListener>>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            cooldown_secs = config.cooldown.as_secs(),
            half_open_max_requests = config.half_open_max_requests,
            "Circuit breaker initialized"
        );

        let breaker = Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            half_open_requests: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            counts_expire_ms: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            epoch: Instant::now(),
            listeners: RwLock::new(Vec::new()),
        };
        breaker.schedule_counts_reset(0);
        breaker
    }

    /// Component name used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, performing the open→half-open transition if the cooldown elapsed
    pub fn state(&self) -> CircuitState {
        let state = CircuitState::from(self.state.load(Ordering::Acquire));
        if state == CircuitState::Open {
            let opened_at = self.opened_at_ms.load(Ordering::Acquire);
            if self.now_ms().saturating_sub(opened_at) >= millis(self.config.cooldown) {
                self.transition(CircuitState::Open, CircuitState::HalfOpen);
                return CircuitState::from(self.state.load(Ordering::Acquire));
            }
        }
        state
    }

    /// Consecutive failures counted in the closed state
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Register a transition callback
    pub fn on_transition<F>(&self, listener: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without invoking `operation` when the
    /// breaker is open or the half-open trial budget is spent, and
    /// [`BreakerError::OperationFailed`] when the operation itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(generation) = self.before_call() else {
            debug!(component = %self.name, "Circuit open, call short-circuited");
            return Err(BreakerError::Open);
        };

        let mut pending = PendingCall {
            breaker: self,
            generation,
            settled: false,
        };
        let result = operation().await;
        pending.settle(result.is_ok());
        result.map_err(BreakerError::OperationFailed)
    }

    /// Admit or reject a call, returning the generation it started in
    fn before_call(&self) -> Option<u64> {
        // `state()` may itself transition, so read the generation after it
        let state = self.state();
        let generation = self.generation.load(Ordering::Acquire);
        match state {
            CircuitState::Closed => {
                self.maybe_reset_counts();
                Some(generation)
            }
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                let max = self.config.half_open_max_requests;
                self.half_open_requests
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .ok()
                    .map(|_| generation)
            }
        }
    }

    fn after_call(&self, generation: u64, success: bool) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }

        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                if success {
                    self.consecutive_failures.store(0, Ordering::Release);
                } else {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!(component = %self.name, failures = failures, "Store call failed");
                    if failures > self.config.failure_threshold {
                        self.transition(CircuitState::Closed, CircuitState::Open);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                    if successes >= self.config.success_threshold {
                        self.transition(CircuitState::HalfOpen, CircuitState::Closed);
                    }
                } else {
                    self.transition(CircuitState::HalfOpen, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Outcome of a call whose future was dropped before it finished
    ///
    /// A cancelled trial counts as a failed trial so its slot is never lost;
    /// in the closed state nothing is recorded.
    fn after_cancel(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if CircuitState::from(self.state.load(Ordering::Acquire)) == CircuitState::HalfOpen {
            warn!(component = %self.name, "Trial call cancelled, reopening circuit");
            self.transition(CircuitState::HalfOpen, CircuitState::Open);
        }
    }

    /// Move from `from` to `to`; a no-op if another caller already moved the state
    fn transition(&self, from: CircuitState, to: CircuitState) {
        if to == CircuitState::Open {
            self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        }
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_requests.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
        if to == CircuitState::Closed {
            self.schedule_counts_reset(self.now_ms());
        }

        match to {
            CircuitState::Open => error!(
                component = %self.name,
                from = %from,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => {
                info!(component = %self.name, "Circuit breaker half-open, allowing trial calls");
            }
            CircuitState::Closed => info!(component = %self.name, "Circuit breaker closed"),
        }

        let listeners: Vec<TransitionListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(from, to);
        }
    }

    fn maybe_reset_counts(&self) {
        if self.config.interval.is_zero() {
            return;
        }
        let now = self.now_ms();
        let expires = self.counts_expire_ms.load(Ordering::Acquire);
        if now >= expires
            && self
                .counts_expire_ms
                .compare_exchange(
                    expires,
                    now + millis(self.config.interval),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.consecutive_failures.store(0, Ordering::Release);
        }
    }

    fn schedule_counts_reset(&self, now: u64) {
        let expires = if self.config.interval.is_zero() {
            u64::MAX
        } else {
            now + millis(self.config.interval)
        };
        self.counts_expire_ms.store(expires, Ordering::Release);
    }

    fn now_ms(&self) -> u64 {
        millis(self.epoch.elapsed())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &CircuitState::from(self.state.load(Ordering::Acquire)))
            .field("consecutive_failures", &self.consecutive_failures())
            .finish_non_exhaustive()
    }
}

/// An admitted call; reports cancellation if dropped before `settle`
struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl PendingCall<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_cancel(self.generation);
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
