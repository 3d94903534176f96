//! Retry envelope around one transport exchange.
//!
//! The whole unit (open session, send, transcode or receive headers, schedule cleanup)
//! is re-invoked with the original request on a retryable failure. Attempts are an
//! explicit loop counter; the unit itself owns closing its session on failure.

use crate::resilience::clock::Clock;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Decision taken after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Attempt bookkeeping handed to every invocation of the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryContext {
    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

pub struct RetryEnvelope {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryEnvelope {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn decide(&self, ctx: RetryContext, error: &Error) -> Decision {
        if !error.is_retryable() || ctx.is_last() {
            return Decision::Fail;
        }
        Decision::Retry {
            delay: self.policy.backoff(),
        }
    }

    /// Run `unit` until it succeeds, fails with a non-retryable error, or attempts run
    /// out. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut unit: F) -> Result<T>
    where
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let ctx = RetryContext {
                attempt,
                max_attempts,
            };
            let error = match unit(ctx).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            match self.decide(ctx, &error) {
                Decision::Retry { delay } => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed; retrying"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                Decision::Fail => {
                    if error.is_retryable() {
                        warn!(attempt, error = %error, "retry attempts exhausted");
                    }
                    return Err(error);
                }
            }
        }
    }
}
