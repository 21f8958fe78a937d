//! Store Backend Implementations
//!
//! # Available Backends
//!
//! - **Redis** - the network store shared by every process (feature: `redis`, default)
//! - **Memory** - in-process `DashMap` store with the same TTL, SCAN and
//!   sliding-window semantics, for single-node deployments and tests
//!
//! # Usage
//!
//! ```rust,no_run
//! use session_cache_guard::backends::{MemoryStore, RedisStore};
//! use session_cache_guard::config::RedisConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let redis = RedisStore::connect(&RedisConfig::default()).await?;
//! let memory = MemoryStore::new();
//! # Ok(())
//! # }
//! ```

pub mod memory_store;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory_store::MemoryStore;

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
