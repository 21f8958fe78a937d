//! Sliding-window rate limiter
//!
//! Each request identity owns a sorted set of hit timestamps in the store,
//! trimmed to the window on every admission, so the window boundary moves
//! continuously instead of resetting in buckets. The limiter fails open: if
//! the store cannot be reached, requests are admitted and a warning is logged.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::RateLimiterConfig;
use crate::error::{CacheError, CacheResult};
use crate::facade::CacheFacade;
use crate::request::RequestContext;

/// Key namespace for authenticated identities
pub const USER_KEY_PREFIX: &str = "rate_limit:user:";

/// Key namespace for address-based identities
pub const IP_KEY_PREFIX: &str = "rate_limit:ip:";

/// Proof of admission, handed back to [`RateLimiter::complete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionTicket {
    /// Identity key the hit was recorded under
    pub key: String,
    /// Recorded window member; `None` when the limiter failed open
    member: Option<String>,
    /// Effective maximum
    pub limit: u64,
    /// Hits left in the current window
    pub remaining: u64,
}

impl AdmissionTicket {
    /// Whether the hit was actually recorded in the store
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        self.member.is_some()
    }
}

/// Admission control keyed by subject or client address
#[derive(Clone)]
pub struct RateLimiter {
    facade: CacheFacade,
    max: u64,
    window: Duration,
    skip_successful: bool,
    proxy_headers: Arc<[String]>,
}

impl RateLimiter {
    /// Build from configuration, enforcing the larger of the two profiles
    pub fn new(facade: CacheFacade, config: &RateLimiterConfig) -> Self {
        let (max, window) = config.effective_limit();
        Self {
            facade,
            max,
            window,
            skip_successful: config.skip_successful_requests,
            proxy_headers: config.trusted_proxy_headers.clone().into(),
        }
    }

    /// Effective `(max, window)`
    #[must_use]
    pub fn limit(&self) -> (u64, Duration) {
        (self.max, self.window)
    }

    /// Identity key: subject, then trusted proxy headers in order, then peer address
    ///
    /// Proxy headers may carry a comma-separated hop list; the first hop is
    /// the originating client.
    #[must_use]
    pub fn identity_key(&self, request: &RequestContext<'_>) -> String {
        if let Some(subject) = request.subject() {
            return format!("{USER_KEY_PREFIX}{subject}");
        }

        let forwarded = self.proxy_headers.iter().find_map(|name| {
            request
                .header(name)
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
        });
        let addr = forwarded.unwrap_or(request.client_addr);
        if addr.is_empty() {
            format!("{IP_KEY_PREFIX}unknown")
        } else {
            format!("{IP_KEY_PREFIX}{addr}")
        }
    }

    /// Admit a request at the current time
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::AdmissionRejected`] when the identity has used up
    /// its window.
    pub async fn admit(&self, request: &RequestContext<'_>) -> CacheResult<AdmissionTicket> {
        self.admit_at(request, SystemTime::now()).await
    }

    /// Admit a request as if it arrived at `now`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::AdmissionRejected`] when the identity has used up
    /// its window. Store failures admit the request.
    pub async fn admit_at(
        &self,
        request: &RequestContext<'_>,
        now: SystemTime,
    ) -> CacheResult<AdmissionTicket> {
        let key = self.identity_key(request);
        if !self.facade.is_available() {
            warn!(key = %key, "Rate limiter store unavailable, admitting request");
            return Ok(self.unrecorded(key));
        }

        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let member = format!("{now_ms}-{:016x}", rand::random::<u64>());
        let window = self.window;

        let recorded = self
            .facade
            .execute_guarded(|store| {
                let (key, member) = (key.clone(), member.clone());
                async move { store.window_record(&key, &member, now_ms, window).await }
            })
            .await;

        match recorded {
            Ok(count) if count > self.max => {
                // A rejected request does not occupy the window
                self.forget(&key, &member).await;
                debug!(key = %key, count = count, max = self.max, "Rate limit exceeded");
                Err(CacheError::AdmissionRejected {
                    retry_after: self.window,
                })
            }
            Ok(count) => Ok(AdmissionTicket {
                key,
                member: Some(member),
                limit: self.max,
                remaining: self.max - count,
            }),
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limiter store error, admitting request");
                Ok(self.unrecorded(key))
            }
        }
    }

    /// Report the final status of an admitted request
    ///
    /// With successful-request skipping on, a status below 400 removes the
    /// request's hit from the window.
    pub async fn complete(&self, ticket: &AdmissionTicket, status: u16) {
        if !self.skip_successful || status >= 400 {
            return;
        }
        if let Some(member) = ticket.member.as_deref() {
            self.forget(&ticket.key, member).await;
        }
    }

    async fn forget(&self, key: &str, member: &str) {
        if let Err(e) = self
            .facade
            .execute_guarded(|store| async move { store.window_forget(key, member).await })
            .await
        {
            debug!(key = %key, error = %e, "Failed to remove rate limit hit");
        }
    }

    fn unrecorded(&self, key: String) -> AdmissionTicket {
        AdmissionTicket {
            key,
            member: None,
            limit: self.max,
            remaining: self.max,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max", &self.max)
            .field("window", &self.window)
            .field("skip_successful", &self.skip_successful)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityFlag;
    use crate::backends::MemoryStore;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::config::BreakerConfig;

    fn limiter(max: u64, window: Duration, skip_successful: bool) -> RateLimiter {
        let availability = Arc::new(AvailabilityFlag::new());
        availability.set(true, "test");
        let facade = CacheFacade::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CircuitBreaker::new("test", BreakerConfig::default())),
            availability,
            Duration::from_secs(1),
        );
        let config = RateLimiterConfig {
            default_max: max,
            default_window: window,
            auth_max: max,
            auth_window: window,
            skip_successful_requests: skip_successful,
            ..RateLimiterConfig::default()
        };
        RateLimiter::new(facade, &config)
    }

    #[test]
    fn test_identity_priority() {
        let limiter = limiter(5, Duration::from_secs(60), false);
        let headers = [
            ("CF-Connecting-IP", "198.51.100.7"),
            ("X-Forwarded-For", "203.0.113.9, 10.0.0.2"),
        ];

        let req = RequestContext::new("GET", "/")
            .with_client_addr("10.0.0.1")
            .with_headers(&headers)
            .with_subject("u1");
        assert_eq!(limiter.identity_key(&req), "rate_limit:user:u1");

        let req = RequestContext::new("GET", "/")
            .with_client_addr("10.0.0.1")
            .with_headers(&headers);
        assert_eq!(limiter.identity_key(&req), "rate_limit:ip:203.0.113.9");

        let cf_only = [("cf-connecting-ip", "198.51.100.7")];
        let req = RequestContext::new("GET", "/")
            .with_client_addr("10.0.0.1")
            .with_headers(&cf_only);
        assert_eq!(limiter.identity_key(&req), "rate_limit:ip:198.51.100.7");

        let req = RequestContext::new("GET", "/").with_client_addr("10.0.0.1");
        assert_eq!(limiter.identity_key(&req), "rate_limit:ip:10.0.0.1");
    }

    #[tokio::test]
    async fn test_sixth_request_in_window_is_rejected() {
        let limiter = limiter(5, Duration::from_secs(60), false);
        let req = RequestContext::new("GET", "/users").with_client_addr("10.0.0.1");
        let start = SystemTime::now();

        for i in 0..5u64 {
            let ticket = limiter
                .admit_at(&req, start + Duration::from_secs(i))
                .await
                .unwrap();
            assert_eq!(ticket.remaining, 4 - i);
        }

        let rejected = limiter
            .admit_at(&req, start + Duration::from_secs(10))
            .await;
        assert!(matches!(
            rejected,
            Err(CacheError::AdmissionRejected { retry_after }) if retry_after == Duration::from_secs(60)
        ));

        // Once the window has slid past every hit, the identity is admitted again
        let ticket = limiter
            .admit_at(&req, start + Duration::from_secs(65))
            .await
            .unwrap();
        assert!(ticket.is_recorded());
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60), false);
        let a = RequestContext::new("GET", "/").with_client_addr("10.0.0.1");
        let b = RequestContext::new("GET", "/").with_client_addr("10.0.0.2");

        assert!(limiter.admit(&a).await.is_ok());
        assert!(limiter.admit(&b).await.is_ok());
        assert!(limiter.admit(&a).await.is_err());
    }

    #[tokio::test]
    async fn test_successful_requests_are_not_counted() {
        let limiter = limiter(2, Duration::from_secs(60), true);
        let req = RequestContext::new("GET", "/").with_client_addr("10.0.0.1");

        for _ in 0..10 {
            let ticket = limiter.admit(&req).await.unwrap();
            limiter.complete(&ticket, 200).await;
        }

        // Failed requests stay in the window
        for _ in 0..2 {
            let ticket = limiter.admit(&req).await.unwrap();
            limiter.complete(&ticket, 500).await;
        }
        assert!(limiter.admit(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_fails_open_without_store() {
        let config = RateLimiterConfig {
            default_max: 1,
            auth_max: 1,
            ..RateLimiterConfig::default()
        };
        let limiter = RateLimiter::new(CacheFacade::disabled(), &config);
        let req = RequestContext::new("GET", "/").with_client_addr("10.0.0.1");

        for _ in 0..3 {
            let ticket = limiter.admit(&req).await.unwrap();
            assert!(!ticket.is_recorded());
        }
    }
}
