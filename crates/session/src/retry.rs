//! Bounded polling with a fixed delay.
//!
//! Used while waiting for the identity provider to hand out an access token,
//! which it may not have ready immediately after reporting "authenticated".

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::config::{DEFAULT_TOKEN_POLL_ATTEMPTS, DEFAULT_TOKEN_POLL_INTERVAL_MS};

/// Every attempt came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gave up after {attempts} attempts")]
pub struct Exhausted {
    /// Attempts made.
    pub attempts: u32,
}

/// Attempt count and spacing for [`poll_until_some`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one is always made).
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Upper bound on a single attempt; a slow attempt counts as empty.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Policy with the default per-attempt timeout.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempt_timeout: Duration::from_secs(2),
        }
    }

    /// Override the per-attempt timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Worst-case wall time before [`poll_until_some`] gives up.
    #[must_use]
    pub fn budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.attempt_timeout * attempts + self.interval * (attempts - 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TOKEN_POLL_ATTEMPTS,
            Duration::from_millis(DEFAULT_TOKEN_POLL_INTERVAL_MS),
        )
    }
}

/// Call `attempt` until it yields `Some`, at most `policy.max_attempts` times.
///
/// The closure receives the 1-based attempt number. Attempts that exceed
/// `policy.attempt_timeout` are abandoned and treated as `None`, so the total
/// wait never exceeds [`RetryPolicy::budget`].
///
/// # Errors
///
/// Returns [`Exhausted`] if no attempt produced a value.
pub async fn poll_until_some<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, Exhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for n in 1..=max_attempts {
        match tokio::time::timeout(policy.attempt_timeout, attempt(n)).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!(attempt = n, "Poll returned nothing"),
            Err(_) => debug!(attempt = n, "Poll attempt timed out"),
        }

        if n < max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Exhausted {
        attempts: max_attempts,
    })
}
