//! Background health monitor
//!
//! Pings the store on a fixed interval and writes the result into the shared
//! [`AvailabilityFlag`]. Probe outcomes never reach callers; they only move
//! the flag (which notifies subscribers on edges) and produce log lines.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::availability::AvailabilityFlag;
use crate::config::HealthConfig;
use crate::traits::KeyValueStore;

/// Periodic liveness probe for the store
pub struct HealthMonitor {
    store: Arc<dyn KeyValueStore>,
    availability: Arc<AvailabilityFlag>,
    interval: Duration,
    probe_timeout: Duration,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthMonitor {
    /// Create a monitor; nothing runs until [`HealthMonitor::start`]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        availability: Arc<AvailabilityFlag>,
        config: HealthConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            availability,
            interval: config.interval,
            probe_timeout: config.probe_timeout,
            shutdown_tx,
        }
    }

    /// Run one probe and record its result
    ///
    /// Returns whether the store answered within the probe timeout.
    pub async fn probe_once(&self) -> bool {
        probe(self.store.as_ref(), &self.availability, self.probe_timeout).await
    }

    /// Availability as last recorded by probes or breaker transitions
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.availability.get()
    }

    /// Start the probe loop
    ///
    /// The first probe runs one interval after start; callers that need an
    /// immediate answer use [`HealthMonitor::probe_once`] first.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let availability = Arc::clone(&self.availability);
        let probe_timeout = self.probe_timeout;
        let period = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            store = store.name(),
            interval_secs = period.as_secs(),
            "Health monitor started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        probe(store.as_ref(), &availability, probe_timeout).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health monitor shutting down...");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the probe loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn probe(store: &dyn KeyValueStore, availability: &AvailabilityFlag, limit: Duration) -> bool {
    let healthy = match tokio::time::timeout(limit, store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(store = store.name(), error = %e, "Health probe failed");
            false
        }
        Err(_) => {
            warn!(store = store.name(), timeout_secs = limit.as_secs(), "Health probe timed out");
            false
        }
    };
    debug!(store = store.name(), healthy = healthy, "Health probe completed");
    availability.set(healthy, "health_monitor");
    healthy
}
