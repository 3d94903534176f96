//! Sequential polling of asynchronous vendor jobs (content-safety scans, generation
//! tasks).
//!
//! One status check is in flight at a time. The poller sleeps `initial_delay` before
//! the first check and `interval` between checks, never after the last one, so `n`
//! checks take `initial_delay + (n - 1) * interval`.

use crate::resilience::clock::Clock;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Classification of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult<T> {
    Pending,
    Succeeded(T),
    /// Provider-reported failure with its reason.
    Failed(String),
}

/// Timing constants of one poller instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl PollSpec {
    pub fn new(initial_delay: Duration, interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay_ms: initial_delay.as_millis() as u64,
            interval_ms: interval.as_millis() as u64,
            max_attempts,
        }
    }

    /// Content-safety scan of uploaded documents: short interval, short cap.
    pub fn safety_scan() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(1), 30)
    }

    /// Generation jobs: long initial delay, long cap.
    pub fn generation() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5), 120)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub struct Poller {
    spec: PollSpec,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(spec: PollSpec, clock: Arc<dyn Clock>) -> Self {
        Self { spec, clock }
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    /// Poll `status` until it reports success or failure, or attempts run out.
    ///
    /// `status` receives the 1-based attempt number. A retryable request failure
    /// counts as a pending iteration, except on the last attempt where it becomes
    /// [`Error::PollFailed`]. Non-retryable errors are returned as-is.
    pub async fn poll<T, F, Fut>(&self, job_id: &str, mut status: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<PollResult<T>>>,
    {
        let max_attempts = self.spec.max_attempts;
        self.clock.sleep(self.spec.initial_delay()).await;

        for attempt in 1..=max_attempts {
            match status(attempt).await {
                Ok(PollResult::Succeeded(value)) => {
                    info!(job_id, attempt, "job finished");
                    return Ok(value);
                }
                Ok(PollResult::Failed(reason)) => {
                    warn!(job_id, attempt, reason = reason.as_str(), "job failed");
                    return Err(Error::PollFailed {
                        job_id: job_id.to_string(),
                        reason,
                    });
                }
                Ok(PollResult::Pending) => {
                    debug!(job_id, attempt, max_attempts, "job still pending");
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt == max_attempts => {
                    return Err(Error::PollFailed {
                        job_id: job_id.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(job_id, attempt, error = %e, "status check failed; will check again");
                }
            }

            if attempt < max_attempts {
                self.clock.sleep(self.spec.interval()).await;
            }
        }

        warn!(job_id, attempts = max_attempts, "job did not finish in time");
        Err(Error::PollTimeout {
            job_id: job_id.to_string(),
            attempts: max_attempts,
        })
    }
}
