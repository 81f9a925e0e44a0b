//! Initial load with retries.
//!
//! A freshly started host may come up before the capability servers it
//! points at (a remote endpoint still booting, a package still installing),
//! so the first `initialize` is retried with exponential backoff.

use std::time::Duration;

use toolbridge_core::McpServiceError;

use crate::manager::McpManager;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Try once, never wait.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Run [`McpManager::initialize`] until it succeeds or attempts run out.
///
/// Returns the error of the last attempt.
pub async fn initialize_with_retry(
    manager: &McpManager,
    policy: RetryPolicy,
) -> Result<(), McpServiceError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;

    for attempt in 1..=max_attempts {
        match manager.initialize().await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::info!(user_id = %manager.user_id(), attempt, "MCP initialization succeeded after retry");
                }
                return Ok(());
            }
            Err(e) if attempt == max_attempts => {
                tracing::error!(
                    user_id = %manager.user_id(),
                    attempts = max_attempts,
                    error = %e,
                    "MCP initialization failed"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %manager.user_id(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "MCP initialization failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }

    Ok(())
}
