//! Process-wide cache availability flag
//!
//! A single atomic boolean written by the health monitor and by circuit
//! breaker transitions, read by every guarded call before any network I/O.
//! Subscribers are notified only on edges, never on repeated writes of the
//! same value.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Callback invoked with the new availability on every edge
pub type AvailabilityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Edge-triggered availability state
///
/// Starts unavailable. The first successful probe flips it to available.
pub struct AvailabilityFlag {
    available: AtomicBool,
    listeners: RwLock<Vec<AvailabilityListener>>,
}

impl AvailabilityFlag {
    /// Create a flag in the unavailable state
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current value (single atomic load)
    #[must_use]
    pub fn get(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Store a new value, notifying subscribers if it changed
    ///
    /// Returns `true` when this call produced an edge.
    pub fn set(&self, available: bool, source: &'static str) -> bool {
        let previous = self.available.swap(available, Ordering::AcqRel);
        if previous == available {
            return false;
        }

        if available {
            info!(source = source, "Cache backend became available");
        } else {
            warn!(source = source, "Cache backend became unavailable");
        }

        // Snapshot so callbacks run without holding the lock
        let listeners: Vec<AvailabilityListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(available);
        }
        true
    }

    /// Register a callback for availability edges
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for AvailabilityFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AvailabilityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityFlag")
            .field("available", &self.get())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
