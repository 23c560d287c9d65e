//! Networked storage backend using Redis.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::StorageBackend;
use crate::error::Result;

/// Atomic increment-then-conditional-expire pair.
///
/// INCRBY and EXPIRE must land in a single round trip: a counter created
/// without its TTL would linger forever if the client died in between.
const INCREMENT_WITH_EXPIRY_SCRIPT: &str = r#"
local created = redis.call("EXISTS", KEYS[1]) == 0
local value = redis.call("INCRBY", KEYS[1], ARGV[1])
if created then
    redis.call("EXPIRE", KEYS[1], ARGV[2])
end
return value
"#;

/// Networked storage backend for multi-instance deployments.
///
/// State lives in a Redis instance reachable by all cooperating processes,
/// so every process renders verdicts against the same counters. Correctness
/// of the increment primitive rests on Redis executing a script atomically.
/// Transport failures surface as storage errors; the caller's failure
/// policy decides the resulting verdict.
pub struct RedisBackend {
    connection: ConnectionManager,
    key_prefix: String,
    increment_script: Script,
}

impl RedisBackend {
    /// Default prefix applied to every Redis key.
    pub const DEFAULT_PREFIX: &'static str = "turnstile:";

    /// Connect with the default key prefix.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_prefix(url, Self::DEFAULT_PREFIX).await
    }

    /// Connect with a custom key prefix.
    ///
    /// Distinct prefixes keep several limiters (or several applications)
    /// from stepping on each other inside one Redis instance.
    pub async fn connect_with_prefix(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            increment_script: Script::new(INCREMENT_WITH_EXPIRY_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// EXPIRE with 0 deletes the key outright; clamp sub-second TTLs up.
    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();
        let key = self.key(key);
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, Self::ttl_secs(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        amount: i64,
        ttl_if_new: Duration,
    ) -> Result<i64> {
        let mut conn = self.connection.clone();
        let value: i64 = self
            .increment_script
            .key(self.key(key))
            .arg(amount)
            .arg(Self::ttl_secs(ttl_if_new))
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }
}

// These tests need a Redis instance at redis://127.0.0.1/ and are skipped by
// default; run them with `cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    const REDIS_URL: &str = "redis://127.0.0.1/";

    fn unique_key(name: &str) -> String {
        format!("test:{}:{}", std::process::id(), name)
    }

    async fn test_backend() -> RedisBackend {
        RedisBackend::connect_with_prefix(REDIS_URL, "turnstile-test:")
            .await
            .expect("redis must be running for ignored tests")
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_set_get_roundtrip() {
        let backend = test_backend().await;
        let key = unique_key("roundtrip");

        backend.set(&key, "v", Some(Duration::from_secs(30))).await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_get_absent_key() {
        let backend = test_backend().await;
        assert_eq!(backend.get(&unique_key("absent")).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_increment_counts_and_expires() {
        let backend = test_backend().await;
        let key = unique_key("counter");
        let ttl = Duration::from_secs(1);

        assert_eq!(backend.increment_with_expiry(&key, 1, ttl).await.unwrap(), 1);
        assert_eq!(backend.increment_with_expiry(&key, 1, ttl).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_prefixes_are_isolated() {
        let a = RedisBackend::connect_with_prefix(REDIS_URL, "turnstile-test-a:")
            .await
            .unwrap();
        let b = RedisBackend::connect_with_prefix(REDIS_URL, "turnstile-test-b:")
            .await
            .unwrap();
        let key = unique_key("isolated");

        a.set(&key, "from-a", Some(Duration::from_secs(30))).await.unwrap();
        assert_eq!(b.get(&key).await.unwrap(), None);
    }
}
