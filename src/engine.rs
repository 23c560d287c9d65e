//! Decision engine tying a strategy to a validated budget.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::RateBudget;
use crate::error::Result;
use crate::strategy::{Decision, RateLimiter};

/// What to do with a check when the storage backend fails.
///
/// The engine never picks a side on its own; [`Turnstile::check`] surfaces
/// the failure and callers opt into a policy through
/// [`Turnstile::check_or`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Admit the request while the backend is unavailable.
    FailOpen,
    /// Reject the request while the backend is unavailable.
    FailClosed,
}

/// The admission-control engine.
///
/// Holds a configured strategy and a validated budget, and renders one
/// verdict per check. The engine owns no per-identifier state itself; it is
/// constructed explicitly by the integrating application and shared by
/// reference across call sites. A strategy or backend failure is scoped to
/// the identifier being checked and never corrupts other identifiers'
/// state.
pub struct Turnstile {
    strategy: Arc<dyn RateLimiter>,
    budget: RateBudget,
}

impl std::fmt::Debug for Turnstile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turnstile")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Turnstile {
    /// Create an engine from a strategy and a validated budget.
    pub fn new(strategy: Arc<dyn RateLimiter>, budget: RateBudget) -> Self {
        Self { strategy, budget }
    }

    /// Check whether `identifier` may proceed under this engine's budget.
    ///
    /// A storage failure comes back as an error, distinguishable from a
    /// legitimate deny verdict; see [`Turnstile::check_or`] for applying an
    /// explicit failure policy instead.
    pub async fn check(&self, identifier: &str) -> Result<Decision> {
        trace!(
            identifier = %identifier,
            limit = self.budget.requests_limit(),
            window = self.budget.window_seconds(),
            "Checking rate limit"
        );

        let decision = self
            .strategy
            .check_rate_limit(
                identifier,
                self.budget.requests_limit(),
                self.budget.window_seconds(),
            )
            .await?;

        if !decision.allowed {
            debug!(
                identifier = %identifier,
                retry_after = decision.retry_after_seconds,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Check with an explicit policy for storage failures.
    ///
    /// Only storage errors are absorbed; configuration and strategy errors
    /// indicate a defect rather than an unavailable backend and still
    /// surface. A failed-closed verdict hints one full window, since the
    /// true remaining time is unknowable without the backend.
    pub async fn check_or(&self, identifier: &str, policy: FailurePolicy) -> Result<Decision> {
        match self.check(identifier).await {
            Ok(decision) => Ok(decision),
            Err(err) if err.is_storage() => {
                warn!(
                    identifier = %identifier,
                    error = %err,
                    "Storage failure during rate limit check"
                );
                match policy {
                    FailurePolicy::FailOpen => Ok(Decision::allow()),
                    FailurePolicy::FailClosed => {
                        Ok(Decision::deny(self.budget.window_seconds()))
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// The budget this engine enforces.
    pub fn budget(&self) -> &RateBudget {
        &self.budget
    }
}

/// Default identifier policy: client address plus operation path.
///
/// Produces `"ip:<client_addr>|path:<path>"`. The engine imposes no
/// structure on identifiers beyond treating distinct strings as distinct
/// subjects, so integrations are free to substitute their own derivation.
pub fn client_identifier(client_addr: &str, path: &str) -> String {
    format!("ip:{}|path:{}", client_addr, path)
}
