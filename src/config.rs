//! Configuration for the Turnstile engine.
//!
//! Everything here is read and validated once, when a call site registers
//! its limiter. Misconfiguration surfaces at that point as a configuration
//! error, never as a runtime surprise under load.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::Turnstile;
use crate::error::{Result, TurnstileError};
use crate::storage::{MemoryBackend, RedisBackend, StorageBackend};
use crate::strategy::{FixedWindowLimiter, RateLimiter, TokenBucketLimiter};

/// An immutable rate budget: at most `requests_limit` events per window of
/// `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    requests_limit: u32,
    window_seconds: u64,
}

impl RateBudget {
    /// Validate and build a budget.
    ///
    /// A zero `requests_limit` is legal and denies every request; a zero
    /// window is not.
    pub fn new(requests_limit: u32, window_seconds: u64) -> Result<Self> {
        if window_seconds == 0 {
            return Err(TurnstileError::Config(
                "window_seconds must be positive".to_string(),
            ));
        }
        Ok(Self {
            requests_limit,
            window_seconds,
        })
    }

    /// Maximum events per window.
    pub fn requests_limit(&self) -> u32 {
        self.requests_limit
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }
}

/// Which strategy renders verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    FixedWindow,
    TokenBucket,
}

/// Where per-identifier state lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackendKind {
    /// In-process state, for single-instance deployments.
    #[default]
    Memory,
    /// Shared Redis state, for cooperating processes.
    Redis { url: String },
}

/// Main configuration for one protected operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Maximum requests allowed in the window.
    pub requests_limit: u32,

    /// Window length in seconds.
    pub window_seconds: u64,

    /// Strategy selection.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Backend selection.
    #[serde(default)]
    pub backend: BackendKind,

    /// Per-identifier window spread in seconds (fixed window only).
    #[serde(default)]
    pub jitter_seconds: u64,

    /// Bucket capacity override (token bucket only; defaults to
    /// `requests_limit`).
    #[serde(default)]
    pub bucket_capacity: Option<u32>,

    /// Prefix for Redis keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    RedisBackend::DEFAULT_PREFIX.to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Wire a backend, a strategy, and a validated budget into an engine.
    pub async fn build(&self) -> Result<Turnstile> {
        let budget = RateBudget::new(self.requests_limit, self.window_seconds)?;

        let storage: Arc<dyn StorageBackend> = match &self.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Redis { url } => {
                Arc::new(RedisBackend::connect_with_prefix(url, &self.key_prefix).await?)
            }
        };

        let strategy: Arc<dyn RateLimiter> = match self.strategy {
            StrategyKind::FixedWindow => Arc::new(FixedWindowLimiter::with_jitter(
                storage,
                self.jitter_seconds,
            )),
            StrategyKind::TokenBucket => match self.bucket_capacity {
                Some(capacity) => Arc::new(TokenBucketLimiter::with_capacity(storage, capacity)),
                None => Arc::new(TokenBucketLimiter::new(storage)),
            },
        };

        Ok(Turnstile::new(strategy, budget))
    }
}
