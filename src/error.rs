//! Error types for the Turnstile engine.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors, raised at registration time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend errors (unreachable, timed out, malformed data)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Strategy invariant violations
    #[error("Strategy error: {0}")]
    Strategy(String),
}

impl TurnstileError {
    /// Whether this error originated in the storage backend.
    ///
    /// A storage failure is reported distinctly from a deny verdict so the
    /// integrating system can apply a fail-open or fail-closed policy of its
    /// own choosing.
    pub fn is_storage(&self) -> bool {
        matches!(self, TurnstileError::Storage(_))
    }
}

impl From<redis::RedisError> for TurnstileError {
    fn from(err: redis::RedisError) -> Self {
        TurnstileError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        TurnstileError::Storage(format!("stored value serialization failed: {}", err))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_predicate() {
        assert!(TurnstileError::Storage("unreachable".to_string()).is_storage());
        assert!(!TurnstileError::Config("bad window".to_string()).is_storage());
        assert!(!TurnstileError::Strategy("negative tokens".to_string()).is_storage());
    }

    #[test]
    fn test_error_display() {
        let err = TurnstileError::Config("window_seconds must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: window_seconds must be positive"
        );
    }
}
