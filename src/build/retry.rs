//! Bounded-timeout-with-retry wrapper for remote calls
//!
//! Each attempt runs under its own deadline. Only transport-level failures
//! (`CairnError::is_retryable`) are retried; any answer the remote actually
//! gave, including a failed build, is returned on the first attempt.

use crate::config::schema::JoinConfig;
use crate::error::{CairnError, CairnResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget and exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (1-based) failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Timeouts and retry policy used while joining an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPolicy {
    /// Sent to the remote: how long it may hold one join call open
    pub blocking_timeout: Duration,
    /// Client-side deadline per join attempt
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl JoinPolicy {
    pub fn from_config(config: &JoinConfig) -> Self {
        Self {
            blocking_timeout: config.blocking_timeout(),
            request_timeout: config.request_timeout(),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
        }
    }
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self::from_config(&JoinConfig::default())
    }
}

/// Call `call` until it succeeds, fails terminally, or the budget runs out.
///
/// An attempt that exceeds `timeout` is dropped and counts as
/// `CairnError::Timeout`. The last error is returned once attempts are exhausted.
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut call: F,
) -> CairnResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CairnResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CairnError::Timeout {
                operation: operation.to_string(),
                secs: timeout.as_secs_f64(),
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    operation, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    debug!("{} giving up after {} attempts", operation, attempt);
                }
                return Err(e);
            }
        }
    }
}
