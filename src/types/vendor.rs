//! Decoded vendor stream payloads.
//!
//! The vendor resends the cumulative assistant text in every record; the terminal record
//! (`msgStatus == "finished"`) may additionally carry the full final parts with
//! `incremental == false`.

use serde::{Deserialize, Deserializer, Serialize};

const STATUS_FINISHED: &str = "finished";
const ROLE_ASSISTANT: &str = "assistant";

/// Content type of a record or content part.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum ContentType {
    #[default]
    Text,
    /// Generated-image content; its text embeds asset URLs.
    GeneratedImage,
    Other(String),
}

impl From<String> for ContentType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" | "" => ContentType::Text,
            "text2image" => ContentType::GeneratedImage,
            _ => ContentType::Other(s),
        }
    }
}

impl From<Option<String>> for ContentType {
    fn from(s: Option<String>) -> Self {
        s.map(ContentType::from).unwrap_or_default()
    }
}

impl From<ContentType> for String {
    fn from(ct: ContentType) -> Self {
        match ct {
            ContentType::Text => "text".to_string(),
            ContentType::GeneratedImage => "text2image".to_string(),
            ContentType::Other(s) => s,
        }
    }
}

impl ContentType {
    /// Only text and generated-image parts contribute to the visible answer.
    pub fn is_renderable(&self) -> bool {
        matches!(self, ContentType::Text | ContentType::GeneratedImage)
    }
}

/// One element of a record's `contents` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorContentPart {
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
}

impl VendorContentPart {
    fn content_text(&self) -> Option<String> {
        match &self.content {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other if self.role == ROLE_ASSISTANT => Some(other.to_string()),
            _ => None,
        }
    }
}

/// A decoded vendor chat record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg_id: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contents: Vec<VendorContentPart>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg_status: String,
    #[serde(default)]
    pub can_share: Option<bool>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub incremental: bool,
}

impl VendorRecord {
    pub fn is_terminal(&self) -> bool {
        self.msg_status == STATUS_FINISHED
    }

    /// `false` only when the vendor explicitly flagged the answer as not shareable.
    pub fn can_share(&self) -> bool {
        self.can_share.unwrap_or(true)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref().filter(|c| !c.is_empty())
    }

    /// `sessionId-msgId` once both halves are known.
    pub fn conversation_id(&self) -> Option<String> {
        if self.session_id.is_empty() || self.msg_id.is_empty() {
            return None;
        }
        Some(format!("{}-{}", self.session_id, self.msg_id))
    }

    /// Concatenation of renderable parts that are assistant-authored or plain strings.
    pub fn combined_text(&self) -> String {
        let mut text = String::new();
        for part in &self.contents {
            if !part.content_type.is_renderable() {
                continue;
            }
            if part.role != ROLE_ASSISTANT && !part.content.is_string() {
                continue;
            }
            if let Some(s) = part.content_text() {
                text.push_str(&s);
            }
        }
        text
    }

    /// Full-resend terminal payload: finished assistant text (or generated-image) parts, if any.
    pub fn final_text(&self) -> Option<String> {
        if !self.is_terminal() || self.incremental || self.contents.is_empty() {
            return None;
        }
        let finished: Vec<String> = self
            .contents
            .iter()
            .filter(|p| {
                p.role == ROLE_ASSISTANT
                    && p.content_type.is_renderable()
                    && p.status == STATUS_FINISHED
            })
            .filter_map(|p| p.content_text())
            .collect();
        if finished.is_empty() {
            None
        } else {
            Some(finished.concat())
        }
    }
}

/// Tagged decoding of one vendor event.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorFrame {
    Record(Box<VendorRecord>),
    /// Well-formed error payload without content (e.g. expired credential).
    Fault { code: String, message: String },
    /// Explicit end-of-stream marker.
    Done,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
