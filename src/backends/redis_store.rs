//! Redis Store - Network Key-Value Backend
//!
//! The production [`KeyValueStore`]. Wraps a `ConnectionManager` (automatic
//! reconnection) and bounds every command by the configured pool, read and
//! write timeouts so no call can hang a request.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::RedisConfig;
use crate::traits::KeyValueStore;

/// Keys fetched per SCAN iteration
const SCAN_BATCH: usize = 100;

/// Redis store with `ConnectionManager` for automatic reconnection
///
/// In-flight commands are bounded by a semaphore of `max_active` permits;
/// a command that cannot get a permit within the pool timeout fails.
pub struct RedisStore {
    /// Redis connection manager - handles reconnection automatically
    conn_manager: ConnectionManager,
    permits: Arc<Semaphore>,
    pool_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisStore {
    /// Connect using the subsystem configuration
    ///
    /// The dial timeout bounds connection setup, followed by a `PING`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the dial times out, or the
    /// initial `PING` fails.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let redis_url = config.connection_url()?;
        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Initializing Redis store with ConnectionManager"
        );

        let client = Client::open(redis_url.as_str())
            .with_context(|| format!("Failed to create Redis client for {}:{}", config.host, config.port))?;

        let conn_manager = tokio::time::timeout(config.dial_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow!("Redis dial timed out after {:?}", config.dial_timeout))?
            .context("Failed to establish Redis connection manager")?;

        let store = Self {
            conn_manager,
            permits: Arc::new(Semaphore::new(config.max_active.max(1))),
            pool_timeout: config.pool_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        };

        store.ping().await.context("Redis PING health check failed")?;
        info!(host = %config.host, port = config.port, "Redis store connected successfully");
        Ok(store)
    }

    /// Connect to a URL with default pool and timeout settings
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the connection fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        let defaults = RedisConfig::default();
        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;
        let conn_manager = tokio::time::timeout(defaults.dial_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow!("Redis dial timed out after {:?}", defaults.dial_timeout))?
            .context("Failed to establish Redis connection manager")?;

        let store = Self {
            conn_manager,
            permits: Arc::new(Semaphore::new(defaults.max_active)),
            pool_timeout: defaults.pool_timeout,
            read_timeout: defaults.read_timeout,
            write_timeout: defaults.write_timeout,
        };
        store.ping().await.context("Redis PING health check failed")?;
        Ok(store)
    }

    /// Run one command under a connection slot and a deadline
    async fn bounded<T, Fut>(&self, limit: Duration, command: Fut) -> Result<T>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let _permit = tokio::time::timeout(self.pool_timeout, self.permits.acquire())
            .await
            .map_err(|_| anyhow!("timed out after {:?} waiting for a Redis connection slot", self.pool_timeout))?
            .context("Redis connection slots closed")?;

        tokio::time::timeout(limit, command)
            .await
            .map_err(|_| anyhow!("Redis command timed out after {limit:?}"))?
            .map_err(Into::into)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        self.bounded(self.read_timeout, async move {
            conn.get::<_, Option<Vec<u8>>>(key).await
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        // SETEX rejects a zero expiry
        let ttl_secs = ttl.as_secs().max(1);
        self.bounded(self.write_timeout, async move {
            conn.set_ex::<_, _, ()>(key, value, ttl_secs).await
        })
        .await?;
        debug!(key = %key, ttl_secs = ttl_secs, "[Redis] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        self.bounded(self.write_timeout, async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn remove_bulk(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn_manager.clone();
        let count: usize = self
            .bounded(self.write_timeout, async move { conn.del(keys).await })
            .await?;
        debug!(count = count, "[Redis] Removed keys in bulk");
        Ok(count)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut conn = self.conn_manager.clone();
            // SCAN cursor MATCH pattern COUNT 100
            let (next, batch): (u64, Vec<String>) = self
                .bounded(self.read_timeout, async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            cursor = next;
            keys.extend(batch);

            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }

    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);
        let mut conn = self.conn_manager.clone();

        // Trim, add, count and refresh the TTL in one MULTI/EXEC
        let (count,): (u64,) = self
            .bounded(self.write_timeout, async move {
                redis::pipe()
                    .atomic()
                    .cmd("ZREMRANGEBYSCORE")
                    .arg(key)
                    .arg(0)
                    .arg(cutoff)
                    .ignore()
                    .cmd("ZADD")
                    .arg(key)
                    .arg(now_ms)
                    .arg(member)
                    .ignore()
                    .cmd("ZCARD")
                    .arg(key)
                    .cmd("PEXPIRE")
                    .arg(key)
                    .arg(window_ms)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn window_forget(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        self.bounded(self.write_timeout, async move {
            conn.zrem::<_, _, ()>(key, member).await
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = self
            .bounded(self.read_timeout, async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
