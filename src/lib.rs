//! # ai-relay-rust
//!
//! 这是一个流式中继运行时：将厂商私有的对话事件流转换为标准的 chat-completion 响应。
//!
//! Streaming relay runtime that translates a vendor's proprietary, cumulative chat
//! event stream into standard chat-completion responses, either as one aggregated
//! envelope or as an incremental SSE chunk stream.
//!
//! ## Overview
//!
//! The vendor resends the whole answer-so-far in every event. The relay parses the
//! raw byte stream into events, decodes each event into a tagged frame, extracts the
//! new safe suffix of the answer (holding back cut multi-byte characters and growing
//! asset URLs) and re-emits it in the standard shape. Around that core sit the
//! transport session lifecycle, a retry envelope, a file reference pipeline and an
//! asynchronous job poller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_relay_rust::{CompletionRequest, CompletionResponse, Message, RelayClient, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> ai_relay_rust::Result<()> {
//!     let client = RelayClient::builder()
//!         .config(RelayConfig::new("https://chat.vendor.example"))
//!         .build()?;
//!
//!     let request = CompletionRequest::new("chat", vec![Message::user("hello")])
//!         .with_credentials(vec!["token".to_string()]);
//!
//!     if let CompletionResponse::Aggregate(completion) = client.complete(request).await? {
//!         println!("{}", completion.content());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Relay client and builder |
//! | [`pipeline`] | SSE parsing, frame decoding, accumulation and transcoding |
//! | [`types`] | Requests, vendor records and completion envelopes |
//! | [`transport`] | Vendor transport seam and its reqwest implementation |
//! | [`session`] | Session guard and post-response cleanup |
//! | [`resilience`] | Retry envelope, job poller and the injectable clock |
//! | [`files`] | File reference precheck, upload and content-safety scan |
//! | [`generation`] | Asynchronous generation jobs |
//! | [`config`] | YAML configuration with environment overrides |

pub mod client;
pub mod config;
pub mod credentials;
pub mod files;
pub mod generation;
pub mod pipeline;
pub mod resilience;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{RelayClient, RelayClientBuilder};
pub use config::RelayConfig;
pub use credentials::CredentialPool;
pub use types::{
    completion::{ChatCompletion, ChatCompletionChunk, CompletionRequest, CompletionResponse},
    message::{Message, MessageRole},
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
