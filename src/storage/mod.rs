//! Storage backends for rate limiter state.

mod memory;
mod redis;

pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Trait for storage backend implementations.
///
/// This trait abstracts over the local `MemoryBackend` and the networked
/// `RedisBackend` to allow strategies to work with either. All mutable
/// per-identifier state lives behind this interface; strategies themselves
/// hold none.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the value stored at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` at `key`, replacing any prior value.
    ///
    /// When `ttl` is given the entry becomes absent after that duration.
    /// The countdown restarts on every call, even if the value is unchanged.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomically add `amount` to the integer stored at `key`, treating an
    /// absent key as 0, and return the post-increment value.
    ///
    /// If this call created the key, its TTL is set to `ttl_if_new`. The
    /// increment and the conditional expiry are indivisible from the
    /// caller's perspective; no concurrent caller can observe the counter
    /// without its TTL.
    async fn increment_with_expiry(
        &self,
        key: &str,
        amount: i64,
        ttl_if_new: Duration,
    ) -> Result<i64>;
}
