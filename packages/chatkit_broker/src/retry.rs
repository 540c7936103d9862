//! Bounded exponential backoff for calls to the session-issuing API.
//!
//! An attempt is retried when the upstream answers 5xx or 429, or when the
//! transport fails with a timeout or network error. Everything else (including
//! 4xx other than 429) ends the loop immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::upstream::{UpstreamError, UpstreamReply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Delay unit; retry `n` waits `2^n * backoff_base`
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Delay before retry number `retry` (1-based): 4s, 8s, 16s at the defaults.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        // 2^31 * base already overflows any sane deployment
        let factor = 1u32 << retry.min(31);
        self.backoff_base.saturating_mul(factor)
    }
}

/// Upstream statuses worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Result of the retry loop plus how much work it took.
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<UpstreamReply, UpstreamError>,
    pub attempts: u32,
}

impl RetryOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `attempt` until it yields a final answer or the policy is exhausted.
///
/// The last reply or error is returned as-is; callers decide how to present it.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, mut attempt: F) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<UpstreamReply, UpstreamError>>,
{
    let mut retry_count = 0u32;

    loop {
        let result = attempt(retry_count).await;

        let trigger = match &result {
            Ok(reply) if reply.is_success() => None,
            Ok(reply) if is_retryable_status(reply.status) => Some(format!(
                "status {} {}",
                reply.status, reply.status_text
            )),
            Ok(_) => None,
            Err(err) if err.is_retryable() => Some(err.to_string()),
            Err(_) => None,
        };

        let Some(trigger) = trigger else {
            return RetryOutcome {
                result,
                attempts: retry_count + 1,
            };
        };

        if retry_count >= policy.max_retries {
            warn!(
                attempts = retry_count + 1,
                trigger = %trigger,
                "Session API still failing after all retries"
            );
            return RetryOutcome {
                result,
                attempts: retry_count + 1,
            };
        }

        retry_count += 1;
        let delay = policy.delay_for_retry(retry_count);
        debug!(
            retry = retry_count,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            trigger = %trigger,
            "Retrying session API call"
        );
        tokio::time::sleep(delay).await;
    }
}
