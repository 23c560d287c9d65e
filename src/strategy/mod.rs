//! Rate limiting strategies.

mod fixed_window;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Seconds to wait before the next check is likely to succeed; 0 when
    /// the request is allowed.
    pub retry_after_seconds: u64,
}

impl Decision {
    /// An allowing verdict.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    /// A denying verdict with a retry hint.
    pub fn deny(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds,
        }
    }
}

/// Trait for rate limiter strategy implementations.
///
/// This trait abstracts over the `FixedWindowLimiter` and the
/// `TokenBucketLimiter` to allow the engine to work with either. A strategy
/// instance is configured once with a backend and is safe for reuse across
/// many identifiers and many concurrent calls.
///
/// `get_data` and `set_data` expose the underlying storage so custom
/// strategies built on top of a configured one can keep their own state
/// next to the limiter's.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check whether `identifier` may spend one admission slot of the
    /// "at most `requests_limit` per `window_seconds`" budget.
    async fn check_rate_limit(
        &self,
        identifier: &str,
        requests_limit: u32,
        window_seconds: u64,
    ) -> Result<Decision>;

    /// Fetch a raw value from the underlying storage.
    async fn get_data(&self, key: &str) -> Result<Option<String>>;

    /// Store a raw value in the underlying storage.
    async fn set_data(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
}
