//! Cache Codec Implementations
//!
//! Built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait.
//! Session records are stored with [`JsonCodec`] so other services can read
//! the `session:user:{id}` layout directly.

mod json;
pub use json::JsonCodec;
