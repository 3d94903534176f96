//! 厂商传输层：会话、JSON 服务调用与文件传输的抽象。
//!
//! Vendor transport abstraction.
//!
//! The relay talks to the vendor through two seams:
//!
//! - [`VendorTransport`]: stateless service calls (conversation deletion, scan and
//!   generation status, uploads) plus remote file access for the reference pipeline
//! - [`VendorSession`]: one dedicated connection per logical request, used for the
//!   single conversation POST whose body is the vendor event stream
//!
//! [`HttpTransport`] is the reqwest-backed implementation; tests substitute scripted
//! in-memory transports.

pub mod http;

pub use http::{HttpSession, HttpTransport};

use crate::{BoxStream, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Metadata returned by an existence/size precheck of a remote file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// A file body ready to be uploaded to the vendor.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub mime: String,
    pub bytes: Bytes,
}

#[async_trait]
pub trait VendorTransport: Send + Sync {
    /// Open a dedicated session for one logical request.
    async fn open_session(&self, credential: &str) -> Result<Box<dyn VendorSession>>;

    /// POST a JSON body to a vendor service path and decode the JSON reply.
    async fn post_json(&self, credential: &str, path: &str, body: &Value) -> Result<Value>;

    /// Multipart upload to a vendor service path; returns the decoded JSON reply.
    async fn upload(&self, credential: &str, path: &str, file: FileUpload) -> Result<Value>;

    /// Existence/size precheck of a caller-supplied file URL.
    async fn probe(&self, url: &str) -> Result<RemoteFileInfo>;

    /// Download a caller-supplied file URL.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

#[async_trait]
pub trait VendorSession: Send {
    /// Send the conversation request and return the raw event-stream body.
    ///
    /// Resolves once response headers arrived with a success status.
    async fn send(&mut self, path: &str, payload: &Value) -> Result<BoxStream<'static, Bytes>>;

    /// Release the underlying connection. Must be safe to call more than once.
    async fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Other(String),
}
