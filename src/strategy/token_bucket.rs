//! Token bucket rate limiting strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{Decision, RateLimiter};
use crate::error::{Result, TurnstileError};
use crate::storage::StorageBackend;

/// Persisted bucket state for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketState {
    /// Tokens currently available, in `[0, capacity]`.
    tokens: f64,
    /// Unix timestamp of the last refill, in seconds.
    last_refill: f64,
}

/// Token bucket rate limiting strategy.
///
/// Each identifier owns a bucket that refills at
/// `requests_limit / window_seconds` tokens per second up to its capacity
/// (the `requests_limit` unless overridden). An admitted request spends
/// exactly one token, so bursts up to the capacity go through instantly
/// while the average rate stays bounded. Tokens keep accruing while
/// requests are being denied.
///
/// The check is a read-compute-write over stored state, so unlike the fixed
/// window's single atomic increment it cannot lean on the backend alone:
/// the strategy serializes the sequence per identifier with an
/// identifier-scoped async lock. Checks for different identifiers never
/// block one another.
pub struct TokenBucketLimiter {
    storage: Arc<dyn StorageBackend>,
    bucket_capacity: Option<u32>,
    // TODO: evict locks for identifiers whose bucket entry has expired.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenBucketLimiter {
    /// Create a limiter whose bucket capacity follows the per-call
    /// `requests_limit`.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            bucket_capacity: None,
            locks: DashMap::new(),
        }
    }

    /// Create a limiter with a fixed bucket capacity, decoupling the
    /// allowed burst size from the average rate.
    pub fn with_capacity(storage: Arc<dyn StorageBackend>, capacity: u32) -> Self {
        Self {
            storage,
            bucket_capacity: Some(capacity),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, identifier: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Storage key for an identifier's bucket.
    fn state_key(identifier: &str) -> String {
        format!("bucket:{}:state", identifier)
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn check_rate_limit(
        &self,
        identifier: &str,
        requests_limit: u32,
        window_seconds: u64,
    ) -> Result<Decision> {
        if window_seconds == 0 {
            return Err(TurnstileError::Config(
                "window_seconds must be positive".to_string(),
            ));
        }

        let capacity = self.bucket_capacity.unwrap_or(requests_limit);
        if requests_limit == 0 || capacity == 0 {
            // No refill or no room to hold a token: nothing is ever admitted.
            return Ok(Decision::deny(window_seconds));
        }

        let refill_rate = f64::from(requests_limit) / window_seconds as f64;
        let key = Self::state_key(identifier);
        let ttl = Duration::from_secs(window_seconds * 2);

        // The write below depends on the read; hold this identifier's lock
        // across the whole sequence so concurrent checks cannot both spend
        // the last token.
        let lock = self.lock_for(identifier);
        let _guard = lock.lock().await;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();

        let (tokens, last_refill) = match self.storage.get(&key).await? {
            Some(raw) => {
                let state: BucketState = serde_json::from_str(&raw)?;
                (state.tokens, state.last_refill)
            }
            // Absent state means a fresh, full bucket.
            None => (f64::from(capacity), now),
        };

        if tokens < 0.0 {
            return Err(TurnstileError::Strategy(format!(
                "negative token count {} for identifier {}",
                tokens, identifier
            )));
        }

        let elapsed = (now - last_refill).max(0.0);
        let new_tokens = (tokens + elapsed * refill_rate).min(f64::from(capacity));

        if new_tokens >= 1.0 {
            let state = BucketState {
                tokens: new_tokens - 1.0,
                last_refill: now,
            };
            self.storage
                .set(&key, &serde_json::to_string(&state)?, Some(ttl))
                .await?;

            trace!(
                identifier = %identifier,
                tokens = state.tokens,
                "Token spent"
            );
            Ok(Decision::allow())
        } else {
            // Tokens accrue even on denial.
            let state = BucketState {
                tokens: new_tokens,
                last_refill: now,
            };
            self.storage
                .set(&key, &serde_json::to_string(&state)?, Some(ttl))
                .await?;

            let retry_after = ((1.0 - new_tokens) / refill_rate).ceil() as u64;
            debug!(
                identifier = %identifier,
                tokens = new_tokens,
                retry_after = retry_after,
                "Token bucket empty"
            );
            Ok(Decision::deny(retry_after.max(1)))
        }
    }

    async fn get_data(&self, key: &str) -> Result<Option<String>> {
        self.storage.get(key).await
    }

    async fn set_data(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.storage.set(key, value, ttl).await
    }
}
