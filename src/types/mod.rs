//! 类型系统模块：定义入站请求、厂商事件与标准化输出的数据类型。
//!
//! # Types Module
//!
//! Strongly-typed representations for the three sides of the relay:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`message`] | Inbound chat messages with text or typed-part content |
//! | [`vendor`] | Decoded vendor stream records and frames |
//! | [`completion`] | Completion request and standardized completion envelopes |
//!
//! ## Example
//!
//! ```rust
//! use ai_relay_rust::types::{CompletionRequest, Message};
//!
//! let request = CompletionRequest::new("chat", vec![Message::user("hello")])
//!     .with_credentials(vec!["token-a".to_string()]);
//! assert!(!request.stream);
//! ```

pub mod completion;
pub mod message;
pub mod vendor;

pub use completion::{
    ChatCompletion, ChatCompletionChunk, CompletionRequest, CompletionResponse, Usage,
};
pub use message::{ContentPart, Message, MessageContent, MessageRole};
pub use vendor::{ContentType, VendorFrame, VendorRecord};
