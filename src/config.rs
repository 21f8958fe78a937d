//! Configuration surface of the cache subsystem
//!
//! Values come from environment variables (optionally seeded from a `.env`
//! file). Every section has a `Default` carrying production defaults, so a
//! process with no cache-related variables set runs in source-of-record-only
//! mode with the rate limiter on its default profile.

use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::error::{CacheError, CacheResult};

/// Default Redis port when only a host is configured
pub const DEFAULT_REDIS_PORT: i32 = 6379;

/// Allowed session TTL range in minutes
pub const SESSION_TTL_RANGE_MINUTES: std::ops::RangeInclusive<u64> = 10..=120;

/// Default session TTL in minutes
pub const DEFAULT_SESSION_TTL_MINUTES: u64 = 30;

/// Connection settings for the external store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Whether a store is configured at all
    pub enabled: bool,
    pub host: String,
    pub port: i32,
    pub password: Option<String>,
    pub db: i64,
    /// Maximum in-flight commands
    pub max_active: usize,
    /// How long a command waits for an in-flight slot
    pub pool_timeout: Duration,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            db: 0,
            max_active: 100,
            pool_timeout: Duration::from_secs(4),
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Check the connection settings
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConfigurationInvalid`] for a port outside
    /// 1..=65535, a negative DB index, or an empty host.
    pub fn validate(&self) -> CacheResult<()> {
        if !(1..=65535).contains(&self.port) {
            return Err(CacheError::ConfigurationInvalid(format!(
                "invalid Redis port: {} (must be between 1-65535)",
                self.port
            )));
        }
        if self.db < 0 {
            return Err(CacheError::ConfigurationInvalid(format!(
                "invalid Redis DB: {} (must be >= 0)",
                self.db
            )));
        }
        if self.host.trim().is_empty() {
            return Err(CacheError::ConfigurationInvalid(
                "Redis host cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection URL, with the password percent-encoded
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConfigurationInvalid`] if the host cannot form a URL.
    pub fn connection_url(&self) -> CacheResult<String> {
        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| CacheError::ConfigurationInvalid(format!("invalid Redis address: {e}")))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password)).map_err(|()| {
                CacheError::ConfigurationInvalid("Redis URL cannot carry a password".to_string())
            })?;
        }
        Ok(url.into())
    }

    /// Upper bound for one guarded call: a reconnect plus the slower command direction
    #[must_use]
    pub fn operation_deadline(&self) -> Duration {
        self.pool_timeout + self.dial_timeout + self.read_timeout.max(self.write_timeout)
    }
}

/// Session cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCacheConfig {
    pub ttl: Duration,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_SESSION_TTL_MINUTES * 60),
        }
    }
}

impl SessionCacheConfig {
    /// Build from a raw minute count, falling back to the default outside the allowed range
    #[must_use]
    pub fn from_minutes(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            info!(
                ttl_minutes = DEFAULT_SESSION_TTL_MINUTES,
                "Session cache TTL not specified, using default"
            );
            return Self::default();
        };

        match raw.parse::<u64>() {
            Ok(minutes) if SESSION_TTL_RANGE_MINUTES.contains(&minutes) => {
                info!(ttl_minutes = minutes, "Session cache TTL configured");
                Self {
                    ttl: Duration::from_secs(minutes * 60),
                }
            }
            Ok(minutes) => {
                warn!(
                    ttl_minutes = minutes,
                    default = DEFAULT_SESSION_TTL_MINUTES,
                    "SESSION_CACHE_TTL outside allowed range (10-120), using default"
                );
                Self::default()
            }
            Err(e) => {
                warn!(value = %raw, error = %e, "Invalid SESSION_CACHE_TTL, using default");
                Self::default()
            }
        }
    }

    /// TTL in whole minutes (cookie max-age is derived from this)
    #[must_use]
    pub fn ttl_minutes(&self) -> u64 {
        self.ttl.as_secs() / 60
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// The breaker trips once consecutive failures exceed this value
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing trial calls
    pub cooldown: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_requests: u32,
    /// Trial successes needed to close again
    pub success_threshold: u32,
    /// Closed-state counter reset period (`Duration::ZERO` disables)
    pub interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            half_open_max_requests: 5,
            success_threshold: 1,
            interval: Duration::from_secs(60),
        }
    }
}

/// Background health probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP response cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    /// Derive per-subject keys for authenticated requests
    pub scope_by_subject: bool,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30 * 60),
            scope_by_subject: true,
        }
    }
}

/// Rate limiter profiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub default_max: u64,
    pub default_window: Duration,
    pub auth_max: u64,
    pub auth_window: Duration,
    /// Remove hits of requests that finished with status < 400
    pub skip_successful_requests: bool,
    /// Proxy headers consulted, in order, before the connection address
    pub trusted_proxy_headers: Vec<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_max: 100,
            default_window: Duration::from_secs(15 * 60),
            auth_max: 500,
            auth_window: Duration::from_secs(15 * 60),
            skip_successful_requests: true,
            trusted_proxy_headers: vec![
                "X-Forwarded-For".to_string(),
                "CF-Connecting-IP".to_string(),
            ],
        }
    }
}

impl RateLimiterConfig {
    /// The single `(max, window)` pair enforced for every request
    ///
    /// The limiter runs before routing, so it cannot know which profile a
    /// request belongs to; the larger of each value applies.
    #[must_use]
    pub fn effective_limit(&self) -> (u64, Duration) {
        (
            self.default_max.max(self.auth_max),
            self.default_window.max(self.auth_window),
        )
    }
}

/// Complete configuration of the cache subsystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsystemConfig {
    pub redis: RedisConfig,
    pub session: SessionCacheConfig,
    pub breaker: BreakerConfig,
    pub health: HealthConfig,
    pub response_cache: ResponseCacheConfig,
    pub rate_limiter: RateLimiterConfig,
}

impl SubsystemConfig {
    /// Load from the process environment, reading `.env` first if present
    #[must_use]
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!(path = %path.display(), "Config file loaded"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, "Failed to load .env file"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let redis = {
            let host = get("REDIS_HOST");
            let port = get("REDIS_PORT");
            let defaults = RedisConfig::default();
            RedisConfig {
                enabled: host.is_some() || port.is_some(),
                host: host.unwrap_or(defaults.host),
                port: port
                    .and_then(|p| p.parse::<i32>().ok())
                    .filter(|p| *p != 0)
                    .unwrap_or(defaults.port),
                password: get("REDIS_PASSWORD"),
                db: get("REDIS_DB")
                    .and_then(|d| d.parse().ok())
                    .unwrap_or(defaults.db),
                max_active: positive(get("REDIS_MAX_ACTIVE")).unwrap_or(defaults.max_active),
                pool_timeout: seconds(get("REDIS_POOL_TIMEOUT")).unwrap_or(defaults.pool_timeout),
                dial_timeout: seconds(get("REDIS_DIAL_TIMEOUT")).unwrap_or(defaults.dial_timeout),
                read_timeout: seconds(get("REDIS_READ_TIMEOUT")).unwrap_or(defaults.read_timeout),
                write_timeout: seconds(get("REDIS_WRITE_TIMEOUT")).unwrap_or(defaults.write_timeout),
            }
        };

        let breaker = {
            let d = BreakerConfig::default();
            BreakerConfig {
                failure_threshold: positive(get("REDIS_BREAKER_FAILURE_THRESHOLD"))
                    .unwrap_or(d.failure_threshold),
                cooldown: duration(get("REDIS_BREAKER_COOLDOWN")).unwrap_or(d.cooldown),
                half_open_max_requests: positive(get("REDIS_BREAKER_HALF_OPEN_MAX_REQUESTS"))
                    .unwrap_or(d.half_open_max_requests),
                success_threshold: positive(get("REDIS_BREAKER_SUCCESS_THRESHOLD"))
                    .unwrap_or(d.success_threshold),
                interval: get("REDIS_BREAKER_INTERVAL")
                    .and_then(|v| parse_duration(&v))
                    .unwrap_or(d.interval),
            }
        };

        let health = {
            let d = HealthConfig::default();
            HealthConfig {
                interval: duration(get("REDIS_HEALTH_INTERVAL")).unwrap_or(d.interval),
                probe_timeout: duration(get("REDIS_HEALTH_PROBE_TIMEOUT")).unwrap_or(d.probe_timeout),
            }
        };

        let response_cache = {
            let d = ResponseCacheConfig::default();
            ResponseCacheConfig {
                enabled: flag(get("RESPONSE_CACHE_ENABLED"), d.enabled),
                ttl: duration(get("RESPONSE_CACHE_TTL")).unwrap_or(d.ttl),
                scope_by_subject: flag(get("RESPONSE_CACHE_SCOPE_BY_SUBJECT"), d.scope_by_subject),
            }
        };

        let rate_limiter = {
            let d = RateLimiterConfig::default();
            RateLimiterConfig {
                enabled: flag(get("RATE_LIMIT_ENABLED"), d.enabled),
                default_max: positive(get("RATE_LIMIT_MAX")).unwrap_or(d.default_max),
                default_window: duration(get("RATE_LIMIT_WINDOW")).unwrap_or(d.default_window),
                auth_max: positive(get("RATE_LIMIT_AUTH_MAX")).unwrap_or(d.auth_max),
                auth_window: duration(get("RATE_LIMIT_AUTH_WINDOW")).unwrap_or(d.auth_window),
                skip_successful_requests: flag(
                    get("RATE_LIMIT_SKIP_SUCCESSFUL"),
                    d.skip_successful_requests,
                ),
                trusted_proxy_headers: get("RATE_LIMIT_PROXY_HEADERS")
                    .map(|list| {
                        list.split(',')
                            .map(str::trim)
                            .filter(|h| !h.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or(d.trusted_proxy_headers),
            }
        };

        Self {
            redis,
            session: SessionCacheConfig::from_minutes(get("SESSION_CACHE_TTL").as_deref()),
            breaker,
            health,
            response_cache,
            rate_limiter,
        }
    }

    /// Validate settings that must be correct before any connection is made
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConfigurationInvalid`] when the store is enabled
    /// with an invalid address.
    pub fn validate(&self) -> CacheResult<()> {
        if self.redis.enabled {
            self.redis.validate()?;
        }
        Ok(())
    }
}

/// Parse a duration: `humantime` syntax (`15m`, `1h 30m`) or bare seconds
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}

fn duration(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|v| parse_duration(&v)).filter(|d| !d.is_zero())
}

fn seconds(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|v| v.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

fn positive<T>(raw: Option<String>) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    raw.and_then(|v| v.parse::<T>().ok()).filter(|v| *v > T::default())
}

fn flag(raw: Option<String>, default: bool) -> bool {
    raw.map_or(default, |v| v.eq_ignore_ascii_case("true") || v == "1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> SubsystemConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SubsystemConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_no_redis_variables_disables_cache() {
        let config = load(&[]);
        assert!(!config.redis.enabled);
        assert!(config.validate().is_ok());
        assert_eq!(config.session.ttl_minutes(), 30);
        assert!(config.rate_limiter.enabled);
    }

    #[test]
    fn test_host_only_uses_default_port() {
        let config = load(&[("REDIS_HOST", "cache.internal")]);
        assert!(config.redis.enabled);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.max_active, 100);
        assert_eq!(config.redis.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_port_only_defaults_host_to_localhost() {
        let config = load(&[("REDIS_PORT", "6380")]);
        assert!(config.redis.enabled);
        assert_eq!(config.redis.host, "localhost");
        assert_eq!(config.redis.port, 6380);
    }

    #[test]
    fn test_invalid_redis_settings_are_fatal() {
        let bad_port = load(&[("REDIS_HOST", "h"), ("REDIS_PORT", "70000")]);
        assert!(matches!(
            bad_port.validate(),
            Err(CacheError::ConfigurationInvalid(_))
        ));

        let bad_db = load(&[("REDIS_HOST", "h"), ("REDIS_DB", "-1")]);
        assert!(matches!(
            bad_db.validate(),
            Err(CacheError::ConfigurationInvalid(_))
        ));

        let mut empty_host = RedisConfig {
            enabled: true,
            ..RedisConfig::default()
        };
        empty_host.host = "  ".to_string();
        assert!(empty_host.validate().is_err());
    }

    #[test]
    fn test_session_ttl_guardrails() {
        assert_eq!(SessionCacheConfig::from_minutes(Some("45")).ttl_minutes(), 45);
        assert_eq!(SessionCacheConfig::from_minutes(Some("10")).ttl_minutes(), 10);
        assert_eq!(SessionCacheConfig::from_minutes(Some("120")).ttl_minutes(), 120);
        assert_eq!(SessionCacheConfig::from_minutes(Some("9")).ttl_minutes(), 30);
        assert_eq!(SessionCacheConfig::from_minutes(Some("121")).ttl_minutes(), 30);
        assert_eq!(SessionCacheConfig::from_minutes(Some("abc")).ttl_minutes(), 30);
        assert_eq!(SessionCacheConfig::from_minutes(None).ttl_minutes(), 30);
    }

    #[test]
    fn test_rate_limit_profiles_resolve_to_larger_values() {
        let config = load(&[
            ("RATE_LIMIT_MAX", "200"),
            ("RATE_LIMIT_WINDOW", "20m"),
            ("RATE_LIMIT_AUTH_MAX", "150"),
            ("RATE_LIMIT_AUTH_WINDOW", "900"),
        ]);
        let (max, window) = config.rate_limiter.effective_limit();
        assert_eq!(max, 200);
        assert_eq!(window, Duration::from_secs(20 * 60));
    }

    #[test]
    fn test_rate_limit_flags_and_headers() {
        let config = load(&[
            ("RATE_LIMIT_ENABLED", "false"),
            ("RATE_LIMIT_PROXY_HEADERS", "X-Real-IP, X-Forwarded-For"),
        ]);
        assert!(!config.rate_limiter.enabled);
        assert_eq!(
            config.rate_limiter.trusted_proxy_headers,
            vec!["X-Real-IP".to_string(), "X-Forwarded-For".to_string()]
        );
    }

    #[test]
    fn test_connection_url_encodes_password() {
        let config = RedisConfig {
            enabled: true,
            host: "cache".to_string(),
            port: 6380,
            password: Some("p@ss word".to_string()),
            db: 2,
            ..RedisConfig::default()
        };
        let url = config.connection_url().unwrap();
        assert_eq!(url, "redis://:p%40ss%20word@cache:6380/2");
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h 30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("soon"), None);
    }
}
