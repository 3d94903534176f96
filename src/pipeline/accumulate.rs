//! Per-stream content accumulation and delta extraction.
//!
//! Vendor records carry the cumulative answer text. The accumulator keeps a cursor into
//! that raw text and hands out only the new, safe suffix:
//!
//! - a U+FFFD marker means the vendor cut a multi-byte character; everything from the
//!   marker on waits for the next record
//! - generated-image text has its asset URLs normalized before it is emitted
//! - a full-resend terminal record replaces the accumulated content instead of
//!   appending to it

use crate::pipeline::normalize::{asset_urls, normalize_asset_urls, trailing_url_start};
use crate::types::vendor::{ContentType, VendorRecord};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Localized texts appended to the terminal unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notices {
    /// Appended when the vendor flags the answer as not shareable.
    pub moderation: String,
    /// Appended when the vendor reports an error code; `{code}` is substituted.
    pub error_code_template: String,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            moderation: "\n[内容由于不合规被停止生成，我们换个话题吧]".to_string(),
            error_code_template: "服务暂时不可用，第三方响应错误：{code}".to_string(),
        }
    }
}

impl Notices {
    pub fn terminal_suffix(&self, record: &VendorRecord) -> String {
        let mut suffix = String::new();
        if !record.can_share() {
            suffix.push_str(&self.moderation);
        }
        if let Some(code) = record.error_code() {
            suffix.push_str(&self.error_code_template.replace("{code}", code));
        }
        suffix
    }
}

/// Output of one ingested record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Increment {
    /// New text to emit; may be empty.
    pub delta: String,
    pub terminal: bool,
}

/// Stream state for one in-flight transcoding operation.
#[derive(Debug)]
pub struct Accumulator {
    accumulated: String,
    content_type: ContentType,
    pending_replacement_boundary: Option<usize>,
    raw_cursor: usize,
    conversation_id: Option<String>,
    stream_image_content: bool,
    notices: Notices,
    finished: bool,
}

impl Accumulator {
    pub fn new(notices: Notices) -> Self {
        Self {
            accumulated: String::new(),
            content_type: ContentType::Text,
            pending_replacement_boundary: None,
            raw_cursor: 0,
            conversation_id: None,
            stream_image_content: false,
            notices,
            finished: false,
        }
    }

    /// Emit generated-image content while it is still generating instead of at the end.
    pub fn with_image_streaming(mut self, enable: bool) -> Self {
        self.stream_image_content = enable;
        self
    }

    /// Normalized content emitted so far, including any terminal notices.
    pub fn content(&self) -> &str {
        &self.accumulated
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// Offset (in the vendor's raw text) of a cut multi-byte character, if one is pending.
    pub fn pending_replacement_boundary(&self) -> Option<usize> {
        self.pending_replacement_boundary
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fold one record into the state and return what became safe to emit.
    pub fn ingest(&mut self, record: &VendorRecord) -> Result<Increment> {
        if self.finished {
            return Ok(Increment::default());
        }
        if self.conversation_id.is_none() {
            self.conversation_id = record.conversation_id();
        }
        self.content_type = record.content_type.clone();

        if !record.is_terminal() {
            let delta = if self.streams_incrementally() {
                self.advance(&record.combined_text(), false)
            } else {
                String::new()
            };
            return Ok(Increment {
                delta,
                terminal: false,
            });
        }

        let mut delta = match record.final_text() {
            Some(final_text) => self.replace_with(&final_text),
            None => self.advance(&record.combined_text(), true),
        };

        if self.content_type == ContentType::GeneratedImage && asset_urls(&self.accumulated).is_empty()
        {
            return Err(Error::business(
                record.error_code().map(str::to_string),
                "generated-image answer finished without any asset",
            ));
        }

        let suffix = self.notices.terminal_suffix(record);
        self.accumulated.push_str(&suffix);
        delta.push_str(&suffix);
        self.finished = true;

        Ok(Increment {
            delta,
            terminal: true,
        })
    }

    fn streams_incrementally(&self) -> bool {
        match self.content_type {
            ContentType::Text => true,
            ContentType::GeneratedImage => self.stream_image_content,
            ContentType::Other(_) => false,
        }
    }

    fn is_image(&self) -> bool {
        self.content_type == ContentType::GeneratedImage
    }

    fn advance(&mut self, text: &str, terminal: bool) -> String {
        self.pending_replacement_boundary = text.find(REPLACEMENT_CHAR);
        let mut safe_end = self.pending_replacement_boundary.unwrap_or(text.len());

        // A URL touching the end may still be growing; normalize it only once complete.
        if !terminal && self.is_image() {
            if let Some(start) = trailing_url_start(&text[..safe_end]) {
                safe_end = start;
            }
        }

        if safe_end <= self.raw_cursor || !text.is_char_boundary(self.raw_cursor) {
            return String::new();
        }

        let slice = &text[self.raw_cursor..safe_end];
        self.raw_cursor = safe_end;
        let piece = if self.is_image() {
            normalize_asset_urls(slice)
        } else {
            slice.to_string()
        };
        self.accumulated.push_str(&piece);
        piece
    }

    fn replace_with(&mut self, final_text: &str) -> String {
        let safe_end = final_text.find(REPLACEMENT_CHAR).unwrap_or(final_text.len());
        let safe = &final_text[..safe_end];
        let normalized = if self.is_image() {
            normalize_asset_urls(safe)
        } else {
            safe.to_string()
        };
        self.raw_cursor = safe.len();
        self.pending_replacement_boundary = None;

        let delta = match normalized.strip_prefix(self.accumulated.as_str()) {
            Some(rest) => rest.to_string(),
            None => {
                debug!(
                    emitted_len = self.accumulated.len(),
                    final_len = normalized.len(),
                    "final payload diverges from streamed text; replacing aggregate only"
                );
                String::new()
            }
        };
        self.accumulated = normalized;
        delta
    }
}
