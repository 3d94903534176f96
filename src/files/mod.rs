//! 文件引用管道：预检、上传、内容安全扫描轮询。
//!
//! File reference pipeline.
//!
//! Files referenced by a request are turned into vendor-side references before any
//! conversation session opens:
//!
//! ```text
//! FileRef ──precheck──▶ bytes ──upload──▶ fileId ──(documents) safety scan poll──▶ ReferenceDescriptor
//! ```
//!
//! Every failure is an [`Error::Reference`] and fails the whole completion request.

use crate::config::RelayConfig;
use crate::error::ReferenceErrorKind;
use crate::resilience::{Clock, PollResult, PollSpec, Poller};
use crate::transport::{FileUpload, VendorTransport};
use crate::{Error, ErrorContext, Result};
use base64::Engine;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(?P<mime>[^;,]*)(?P<params>(?:;[^;,]*)*),(?P<data>.*)$")
        .expect("data URI pattern is valid")
});

const DEFAULT_MIME: &str = "application/octet-stream";

/// A caller-supplied file reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Remote { url: String },
    Inline { name: String, mime: String, data: Bytes },
}

impl FileRef {
    /// Accepts `http(s)://` URLs and `data:<mime>;base64,<payload>` URIs.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            url::Url::parse(raw).map_err(|e| invalid_ref(raw, e.to_string()))?;
            return Ok(FileRef::Remote {
                url: raw.to_string(),
            });
        }

        let caps = DATA_URI
            .captures(raw)
            .ok_or_else(|| invalid_ref(raw, "expected an http(s) URL or a data URI".to_string()))?;
        if !caps["params"].split(';').any(|p| p == "base64") {
            return Err(invalid_ref(raw, "only base64 data URIs are supported".to_string()));
        }
        let data = base64::engine::general_purpose::STANDARD
            .decode(caps["data"].trim())
            .map_err(|e| invalid_ref(raw, format!("invalid base64 payload: {}", e)))?;
        let mime = match &caps["mime"] {
            "" => DEFAULT_MIME.to_string(),
            m => m.to_string(),
        };
        let name = match mime_guess::get_mime_extensions_str(&mime).and_then(|exts| exts.first()) {
            Some(ext) => format!("upload.{}", ext),
            None => "upload".to_string(),
        };
        Ok(FileRef::Inline {
            name,
            mime,
            data: Bytes::from(data),
        })
    }

    /// Short form used in logs and errors; inline payloads are never echoed.
    pub fn display_name(&self) -> String {
        match self {
            FileRef::Remote { url } => url.clone(),
            FileRef::Inline { name, data, .. } => format!("{} ({} bytes inline)", name, data.len()),
        }
    }
}

fn invalid_ref(raw: &str, details: String) -> Error {
    let shown: String = raw.chars().take(64).collect();
    Error::validation_with_context(
        format!("unsupported file reference '{}'", shown),
        ErrorContext::new()
            .with_field_path("request.messages.content")
            .with_details(details),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Image,
    Document,
}

impl ReferenceKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            ReferenceKind::Image
        } else {
            ReferenceKind::Document
        }
    }
}

/// A vendor-side file reference, ready to be attached to a conversation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub file_id: String,
    pub url: String,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub kind: ReferenceKind,
}

impl ReferenceDescriptor {
    /// Vendor `contents[]` entry for this file.
    pub fn to_vendor_content(&self) -> Value {
        let content_type = match self.kind {
            ReferenceKind::Image => "image",
            ReferenceKind::Document => "file",
        };
        json!({
            "role": "user",
            "contentType": content_type,
            "content": self.url,
            "ext": {
                "fileId": self.file_id,
                "fileName": self.name,
                "fileSize": self.size,
                "mimeType": self.mime,
            }
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadReply {
    #[serde(default)]
    file_id: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ScanReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

impl ScanReply {
    fn classify(self) -> PollResult<()> {
        match self.status.as_str() {
            "success" => PollResult::Succeeded(()),
            "failed" => PollResult::Failed(
                self.reason
                    .unwrap_or_else(|| "rejected by content-safety scan".to_string()),
            ),
            _ => PollResult::Pending,
        }
    }
}

/// Turns [`FileRef`]s into [`ReferenceDescriptor`]s.
pub struct FilePipeline {
    transport: Arc<dyn VendorTransport>,
    upload_path: String,
    status_path: String,
    max_file_size: u64,
    poller: Poller,
}

impl FilePipeline {
    pub fn new(transport: Arc<dyn VendorTransport>, config: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_scan_spec(transport, config, config.poll.safety_scan, clock)
    }

    pub fn with_scan_spec(
        transport: Arc<dyn VendorTransport>,
        config: &RelayConfig,
        scan: PollSpec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            upload_path: config.endpoints.file_upload.clone(),
            status_path: config.endpoints.file_status.clone(),
            max_file_size: config.files.max_file_size,
            poller: Poller::new(scan, clock),
        }
    }

    pub async fn upload(&self, credential: &str, file: &FileRef) -> Result<ReferenceDescriptor> {
        let reference = file.display_name();
        let upload = self.materialize(file, &reference).await?;
        let name = upload.name.clone();
        let mime = upload.mime.clone();
        let size = upload.bytes.len() as u64;

        let reply = self
            .transport
            .upload(credential, &self.upload_path, upload)
            .await
            .map_err(|e| reference_error(ReferenceErrorKind::UploadFailed, &reference, e.to_string()))?;
        let reply: UploadReply = serde_json::from_value(reply).map_err(|e| {
            reference_error(ReferenceErrorKind::UploadFailed, &reference, e.to_string())
        })?;
        if reply.file_id.is_empty() {
            return Err(reference_error(
                ReferenceErrorKind::UploadFailed,
                &reference,
                "upload reply carried no file id".to_string(),
            ));
        }

        let kind = ReferenceKind::from_mime(&mime);
        if kind == ReferenceKind::Document {
            self.await_scan(credential, &reply.file_id, &reference).await?;
        }

        info!(file_id = reply.file_id.as_str(), size, kind = ?kind, "file reference ready");
        Ok(ReferenceDescriptor {
            file_id: reply.file_id,
            url: reply.url,
            name,
            mime,
            size,
            kind,
        })
    }

    async fn materialize(&self, file: &FileRef, reference: &str) -> Result<FileUpload> {
        match file {
            FileRef::Inline { name, mime, data } => {
                self.check_size(data.len() as u64, reference)?;
                Ok(FileUpload {
                    name: name.clone(),
                    mime: mime.clone(),
                    bytes: data.clone(),
                })
            }
            FileRef::Remote { url } => {
                let unreachable =
                    |e: Error| reference_error(ReferenceErrorKind::Unreachable, reference, e.to_string());

                let info = self.transport.probe(url).await.map_err(unreachable)?;
                if let Some(len) = info.content_length {
                    self.check_size(len, reference)?;
                }
                let bytes = self.transport.fetch(url).await.map_err(unreachable)?;
                self.check_size(bytes.len() as u64, reference)?;

                let name = file_name_of(url);
                let mime = info
                    .content_type
                    .as_deref()
                    .and_then(|ct| ct.split(';').next())
                    .map(|ct| ct.trim().to_string())
                    .filter(|ct| !ct.is_empty() && ct != DEFAULT_MIME)
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&name)
                            .first_raw()
                            .unwrap_or(DEFAULT_MIME)
                            .to_string()
                    });
                debug!(url = url.as_str(), size = bytes.len(), mime = mime.as_str(), "fetched remote file");
                Ok(FileUpload { name, mime, bytes })
            }
        }
    }

    fn check_size(&self, size: u64, reference: &str) -> Result<()> {
        if size > self.max_file_size {
            return Err(reference_error(
                ReferenceErrorKind::Oversize,
                reference,
                format!("{} bytes exceeds the {} byte limit", size, self.max_file_size),
            ));
        }
        Ok(())
    }

    async fn await_scan(&self, credential: &str, file_id: &str, reference: &str) -> Result<()> {
        let body = json!({ "fileId": file_id });
        let result = self
            .poller
            .poll(file_id, |_attempt| {
                let body = &body;
                async move {
                    let reply = self
                        .transport
                        .post_json(credential, &self.status_path, body)
                        .await?;
                    let reply: ScanReply = serde_json::from_value(reply)?;
                    Ok(reply.classify())
                }
            })
            .await;

        result.map_err(|e| match e {
            Error::PollTimeout { .. } => {
                reference_error(ReferenceErrorKind::ScanTimeout, reference, e.to_string())
            }
            other => reference_error(ReferenceErrorKind::ScanFailed, reference, other.to_string()),
        })
    }
}

fn reference_error(kind: ReferenceErrorKind, reference: &str, message: String) -> Error {
    Error::reference(kind, reference, message)
}

fn file_name_of(raw_url: &str) -> String {
    url::Url::parse(raw_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remote_and_inline_references() {
        assert_eq!(
            FileRef::parse("https://x/doc.pdf").unwrap(),
            FileRef::Remote {
                url: "https://x/doc.pdf".into()
            }
        );

        match FileRef::parse("data:image/png;base64,aGVsbG8=").unwrap() {
            FileRef::Inline { mime, data, name } => {
                assert_eq!(mime, "image/png");
                assert_eq!(&data[..], b"hello");
                assert_eq!(name, "upload.png");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_unsupported_references() {
        assert!(FileRef::parse("ftp://x/file").is_err());
        assert!(FileRef::parse("data:text/plain,hello").is_err());
        assert!(FileRef::parse("data:text/plain;base64,@@@").is_err());
    }

    #[test]
    fn classifies_by_mime_and_names_by_path() {
        assert_eq!(ReferenceKind::from_mime("image/jpeg"), ReferenceKind::Image);
        assert_eq!(ReferenceKind::from_mime("application/pdf"), ReferenceKind::Document);
        assert_eq!(file_name_of("https://x/a/report.pdf?sig=1"), "report.pdf");
        assert_eq!(file_name_of("https://x/"), "file");
    }

    #[test]
    fn descriptor_maps_to_vendor_content_entry() {
        let d = ReferenceDescriptor {
            file_id: "f1".into(),
            url: "https://vendor/f1".into(),
            name: "a.png".into(),
            mime: "image/png".into(),
            size: 3,
            kind: ReferenceKind::Image,
        };
        let v = d.to_vendor_content();
        assert_eq!(v["contentType"], "image");
        assert_eq!(v["content"], "https://vendor/f1");
        assert_eq!(v["ext"]["fileId"], "f1");
    }
}
