//! 弹性模式模块：提供异步任务轮询器和重试包络等可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! Recovery and waiting primitives shared by the request path:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`clock`] | Injectable sleep source (tokio timer or a manual test clock) |
//! | [`poller`] | Sequential status polling for submitted asynchronous jobs |
//! | [`retry`] | Fixed-backoff retry loop around one transport exchange |
//!
//! ## Poller
//!
//! ```rust
//! use ai_relay_rust::resilience::{clock::ManualClock, poller::{PollResult, PollSpec, Poller}};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let clock = Arc::new(ManualClock::new());
//! let poller = Poller::new(PollSpec::new(Duration::from_secs(1), Duration::from_secs(2), 5), clock.clone());
//! let url: String = poller
//!     .poll("job-1", |_attempt| async { Ok(PollResult::Succeeded("done".to_string())) })
//!     .await
//!     .unwrap();
//! assert_eq!(url, "done");
//! assert_eq!(clock.elapsed(), Duration::from_secs(1));
//! # });
//! ```
//!
//! ## Retry envelope
//!
//! Only errors for which [`crate::Error::is_retryable`] holds are retried; the
//! envelope sleeps the fixed backoff between attempts and re-raises the last error
//! once attempts are exhausted.

pub mod clock;
pub mod poller;
pub mod retry;

pub use clock::{Clock, ManualClock, TokioClock};
pub use poller::{PollResult, PollSpec, Poller};
pub use retry::{RetryContext, RetryEnvelope, RetryPolicy};
