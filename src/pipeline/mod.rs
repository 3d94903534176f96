//! 流水线处理模块：将厂商 SSE 事件流转译为标准化的增量对话补全流。
//!
//! # Stream Pipeline
//!
//! This module turns the vendor's raw event-stream body into standardized
//! chat-completion output.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Raw Bytes → SseParser → VendorFrame → Accumulator → Transcoder → Envelope / SSE chunks
//!     │           │            │              │              │
//!   HTTP      named events  tagged record   safe deltas,   aggregate or
//!             (byte-level)  / fault / done  URL rewrite    role→deltas→stop→[DONE]
//! ```
//!
//! ## Submodules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | SSE event parser and tagged frame decoding |
//! | [`accumulate`] | Per-stream state and delta extraction |
//! | [`normalize`] | Generated-asset URL normalization |
//! | [`transcode`] | Aggregate and streaming transcoders |

pub mod accumulate;
pub mod decode;
pub mod normalize;
pub mod transcode;


pub use accumulate::{Accumulator, Increment, Notices};
pub use decode::{decode_frames, SseParser, VendorEvent};
pub use normalize::{normalize_asset_urls, normalize_url};
pub use transcode::{OutboundSink, TranscodeOutcome, TranscodeStatus, Transcoder};

/// Pipeline error types
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Malformed vendor payload in `{event}` event: {reason}{}", .hint.as_ref().map(|h| format!("\n💡 Hint: {}", h)).unwrap_or_default())]
    MalformedPayload {
        event: String,
        reason: String,
        hint: Option<String>,
    },
}

impl PipelineError {
    /// Attach an actionable hint to the error
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        let hint_val = Some(hint.into());
        if let PipelineError::MalformedPayload { ref mut hint, .. } = self {
            *hint = hint_val;
        }
        self
    }
}
