//! Retry with exponential backoff for module calls
//!
//! Off by default: a module call is attempted once. When enabled, transient
//! failures are retried inside the same per-call deadline.

use crate::client::ModuleError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry behaviour for module calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying)
    #[serde(default)]
    pub max_retries: u32,

    /// Backoff before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for any single backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::default()
    }

    /// Backoff before retry number `attempt` (0-based), doubling each time
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(base.min(self.max_backoff_ms))
    }
}

/// Whether a failed module call is worth another attempt
pub fn is_transient(error: &ModuleError) -> bool {
    match error {
        ModuleError::Transport(_) | ModuleError::DeadlineExceeded(_) => true,
        ModuleError::Status(status) => *status == 429 || (500..=599).contains(status),
        ModuleError::MalformedBody(_) => false,
    }
}

/// Run `operation` under `policy`, returning the last error when giving up
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    module: &str,
    mut operation: F,
) -> Result<T, ModuleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModuleError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_transient(&e) => {
                debug!(module, attempt, error = %e, "Module call failed permanently");
                return Err(e);
            }
            Err(e) if attempt >= policy.max_retries => {
                if policy.max_retries > 0 {
                    warn!(module, attempts = attempt + 1, error = %e, "Giving up on module");
                }
                return Err(e);
            }
            Err(e) => {
                let backoff = policy.backoff_duration(attempt);
                warn!(
                    module,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying module call"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
