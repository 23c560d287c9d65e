//! Local in-process storage backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::StorageBackend;
use crate::error::{Result, TurnstileError};

/// A stored value and its expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-process storage backend for single-instance deployments.
///
/// State lives in a sharded map, so operations on one key serialize on that
/// key's entry guard while different keys proceed in parallel. Expiry is
/// evaluated lazily on access; a read past the TTL deletes the entry and
/// reports it absent. [`MemoryBackend::start_sweeper`] adds an optional
/// best-effort active sweep on top.
///
/// This backend never returns a storage error.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry.
    ///
    /// Holds each shard lock only for the entry currently being examined,
    /// so concurrent checks are not blocked for longer than a single
    /// per-key critical section.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// Spawn a background task sweeping expired entries every `interval`.
    ///
    /// Lazy expiry on access already keeps reads correct; the sweeper only
    /// bounds the memory held by identifiers that never come back. Calling
    /// this again replaces the previous sweeper. The task exits on its own
    /// once the backend is dropped.
    pub fn start_sweeper(backend: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(backend);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(backend) => {
                        trace!(entries = backend.entries.len(), "Sweeping expired entries");
                        backend.sweep();
                    }
                    None => break,
                }
            }
        });

        if let Some(previous) = backend.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background sweeper, if one is running.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Whether the backend holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if live.is_none() {
            // A read past the TTL deletes the entry so no caller ever
            // observes an expired value as present.
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }

        Ok(live)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        self.entries
            .insert(key.to_string(), Entry::new(value.to_string(), ttl, now));
        Ok(())
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        amount: i64,
        ttl_if_new: Duration,
    ) -> Result<i64> {
        let now = Instant::now();

        // The entry guard holds this key's shard lock for the whole
        // read-modify-write, making the increment atomic per key.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0".to_string(), Some(ttl_if_new), now));

        // An entry past its TTL counts as absent: restart from zero with a
        // fresh expiry.
        if entry.is_expired(now) {
            *entry = Entry::new("0".to_string(), Some(ttl_if_new), now);
        }

        let current: i64 = entry.value.parse().map_err(|_| {
            TurnstileError::Storage(format!("non-integer value at key {}", key))
        })?;
        let next = current + amount;
        entry.value = next.to_string();

        Ok(next)
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
