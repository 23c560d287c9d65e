//! Fixed window rate limiting strategy.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{Decision, RateLimiter};
use crate::error::{Result, TurnstileError};
use crate::storage::StorageBackend;

/// Fixed window rate limiting strategy.
///
/// Requests are counted against the window containing the current instant
/// (window index = `now / window_seconds`, floor division, so an instant on
/// the boundary belongs to the new window). The count lives in storage under
/// one key per identifier per window and disappears with the window's TTL.
///
/// With jitter configured, each identifier's window is extended by a stable
/// offset in `[0, jitter_seconds)`, spreading reset instants apart so a
/// crowd of identifiers does not hammer the service the moment a shared
/// window rolls over.
pub struct FixedWindowLimiter {
    storage: Arc<dyn StorageBackend>,
    jitter_seconds: u64,
}

impl FixedWindowLimiter {
    /// Create a limiter without jitter.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_jitter(storage, 0)
    }

    /// Create a limiter whose windows are extended per identifier by a
    /// stable offset in `[0, jitter_seconds)`.
    pub fn with_jitter(storage: Arc<dyn StorageBackend>, jitter_seconds: u64) -> Self {
        Self {
            storage,
            jitter_seconds,
        }
    }

    /// Jitter offset for an identifier.
    ///
    /// Derived from the identifier alone, never re-randomized, so repeated
    /// checks and separate processes agree on the same offset.
    fn jitter_offset(&self, identifier: &str) -> u64 {
        if self.jitter_seconds == 0 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        identifier.hash(&mut hasher);
        hasher.finish() % self.jitter_seconds
    }

    /// Storage key for an identifier within a window.
    fn window_key(identifier: &str, window_index: u64) -> String {
        format!("window:{}:{}", identifier, window_index)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
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

        let jitter = self.jitter_offset(identifier);

        if requests_limit == 0 {
            // A zero budget admits nothing; the hint is the full window.
            return Ok(Decision::deny(window_seconds + jitter));
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let window_index = now / window_seconds;
        let window_start = window_index * window_seconds;

        let count = self
            .storage
            .increment_with_expiry(
                &Self::window_key(identifier, window_index),
                1,
                Duration::from_secs(window_seconds + jitter),
            )
            .await?;

        trace!(
            identifier = %identifier,
            count = count,
            limit = requests_limit,
            "Checked fixed window"
        );

        if count <= i64::from(requests_limit) {
            Ok(Decision::allow())
        } else {
            let retry_after = (window_start + window_seconds + jitter).saturating_sub(now);
            debug!(
                identifier = %identifier,
                count = count,
                retry_after = retry_after,
                "Fixed window limit exceeded"
            );
            Ok(Decision::deny(retry_after))
        }
    }

    async fn get_data(&self, key: &str) -> Result<Option<String>> {
        self.storage.get(key).await
    }

    async fn set_data(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.storage.set(key, value, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn limiter() -> FixedWindowLimiter {
        FixedWindowLimiter::new(Arc::new(MemoryBackend::new()))
    }

    /// Sleep until just past a `window_seconds` boundary so a short test
    /// cannot straddle a rollover.
    async fn align_to_window(window_seconds: u64) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap();
        let into_window = now.as_secs_f64() % window_seconds as f64;
        let remaining = window_seconds as f64 - into_window;
        tokio::time::sleep(Duration::from_secs_f64(remaining + 0.05)).await;
    }

    #[tokio::test]
    async fn test_first_request_allowed() {
        let limiter = limiter();
        let decision = limiter.check_rate_limit("client", 5, 60).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.retry_after_seconds, 0);
    }

    #[tokio::test]
    async fn test_denies_past_limit_with_retry_hint() {
        let limiter = limiter();

        for _ in 0..5 {
            assert!(limiter.check_rate_limit("client", 5, 60).await.unwrap().allowed);
        }

        let decision = limiter.check_rate_limit("client", 5, 60).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after_seconds > 0);
        assert!(decision.retry_after_seconds <= 60);
    }

    #[tokio::test]
    async fn test_zero_limit_denies_everything() {
        let limiter = limiter();
        let decision = limiter.check_rate_limit("client", 0, 60).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_seconds, 60);
    }

    #[tokio::test]
    async fn test_zero_window_is_a_config_error() {
        let limiter = limiter();
        let err = limiter.check_rate_limit("client", 5, 0).await.unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[tokio::test]
    async fn test_window_rollover_resets_count() {
        let limiter = limiter();
        align_to_window(1).await;

        assert!(limiter.check_rate_limit("client", 2, 1).await.unwrap().allowed);
        assert!(limiter.check_rate_limit("client", 2, 1).await.unwrap().allowed);
        assert!(!limiter.check_rate_limit("client", 2, 1).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.check_rate_limit("client", 2, 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_entry_expires_from_storage() {
        let limiter = limiter();
        align_to_window(1).await;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let key = FixedWindowLimiter::window_key("client", now);

        limiter.check_rate_limit("client", 5, 1).await.unwrap();
        assert_eq!(limiter.get_data(&key).await.unwrap(), Some("1".to_string()));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(limiter.get_data(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identifier_isolation() {
        let limiter = limiter();

        for _ in 0..3 {
            limiter.check_rate_limit("a", 3, 60).await.unwrap();
        }
        assert!(!limiter.check_rate_limit("a", 3, 60).await.unwrap().allowed);
        assert!(limiter.check_rate_limit("b", 3, 60).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_jitter_offset_is_stable_and_bounded() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let first = FixedWindowLimiter::with_jitter(storage.clone(), 30);
        let second = FixedWindowLimiter::with_jitter(storage, 30);

        let offset = first.jitter_offset("client");
        assert!(offset < 30);
        assert_eq!(offset, first.jitter_offset("client"));
        // Identically configured instances derive the same offset.
        assert_eq!(offset, second.jitter_offset("client"));
    }

    #[tokio::test]
    async fn test_zero_limit_hint_includes_jitter() {
        let limiter =
            FixedWindowLimiter::with_jitter(Arc::new(MemoryBackend::new()), 30);
        let jitter = limiter.jitter_offset("client");

        let decision = limiter.check_rate_limit("client", 0, 60).await.unwrap();
        assert_eq!(decision.retry_after_seconds, 60 + jitter);
    }

    #[tokio::test]
    async fn test_shared_backend_instances_agree() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let first = FixedWindowLimiter::new(storage.clone());
        let second = FixedWindowLimiter::new(storage);

        assert!(first.check_rate_limit("client", 4, 3600).await.unwrap().allowed);
        assert!(second.check_rate_limit("client", 4, 3600).await.unwrap().allowed);
        assert!(first.check_rate_limit("client", 4, 3600).await.unwrap().allowed);
        assert!(second.check_rate_limit("client", 4, 3600).await.unwrap().allowed);

        // Both instances see the shared count as exhausted.
        assert!(!first.check_rate_limit("client", 4, 3600).await.unwrap().allowed);
        assert!(!second.check_rate_limit("client", 4, 3600).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_lost_updates_under_concurrency() {
        let limiter = Arc::new(limiter());
        let n = 20u32;

        let tasks: Vec<_> = (0..n)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.check_rate_limit("client", n, 3600).await.unwrap()
                })
            })
            .collect();

        let decisions = futures::future::join_all(tasks).await;
        let allowed = decisions
            .into_iter()
            .filter(|d| d.as_ref().unwrap().allowed)
            .count();

        // Exactly the budget is admitted, and the next check is denied.
        assert_eq!(allowed, n as usize);
        assert!(!limiter.check_rate_limit("client", n, 3600).await.unwrap().allowed);
    }
}
