//! Completion request and standardized (OpenAI-compatible) completion envelopes

use crate::types::message::Message;
use crate::BoxStream;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// SSE sentinel terminating every translated stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Inbound completion request handed over by the routing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Requested model variant name.
    pub model: String,
    pub messages: Vec<Message>,
    /// Reference to a previous turn, `sessionId-msgId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    /// Credential pool for this request; filled from the caller's authorization header.
    #[serde(skip)]
    pub credentials: Vec<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            conversation_id: None,
            stream: false,
            credentials: Vec::new(),
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Vec<String>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Token usage block. The vendor does not report counts, so these are placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Default for Usage {
    fn default() -> Self {
        Self {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

/// Aggregate-mode envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub model: String,
    pub object: String,
    pub created: i64,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

impl ChatCompletion {
    pub fn new(id: impl Into<String>, model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            object: "chat.completion".to_string(),
            created: unix_now(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content: content.into(),
                },
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        }
    }

    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// Streaming-mode delta chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub model: String,
    pub object: String,
    pub choices: Vec<ChunkChoice>,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    fn with_delta(id: &str, model: &str, delta: ChunkDelta, finish_reason: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            object: "chat.completion.chunk".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            created: unix_now(),
            usage: None,
        }
    }

    pub fn role_open(id: &str, model: &str) -> Self {
        Self::with_delta(
            id,
            model,
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
            },
            None,
        )
    }

    pub fn content(id: &str, model: &str, content: impl Into<String>) -> Self {
        Self::with_delta(
            id,
            model,
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(content.into()),
            },
            None,
        )
    }

    pub fn finish(id: &str, model: &str, content: impl Into<String>, usage: Usage) -> Self {
        let mut chunk = Self::with_delta(
            id,
            model,
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(content.into()),
            },
            Some("stop"),
        );
        chunk.usage = Some(usage);
        chunk
    }

    /// Delta content carried by this chunk (empty for the role-open chunk).
    pub fn delta_content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or_default()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }

    /// Encode as one `data: <json>\n\n` SSE frame.
    pub fn to_sse_frame(&self) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Bytes::from(format!("data: {}\n\n", json)))
    }
}

/// Result of a completion: one envelope, or an SSE body of chunk frames.
pub enum CompletionResponse {
    Aggregate(ChatCompletion),
    Stream(BoxStream<'static, Bytes>),
}

impl std::fmt::Debug for CompletionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionResponse::Aggregate(c) => f.debug_tuple("Aggregate").field(c).finish(),
            CompletionResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_frames_use_sse_data_prefix() {
        let chunk = ChatCompletionChunk::content("s-m", "chat", "hi");
        let frame = chunk.to_sse_frame().unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));
        assert!(text.contains("\"object\":\"chat.completion.chunk\""));
        assert!(text.contains("\"finish_reason\":null"));
        assert!(!text.contains("\"usage\""));
    }

    #[test]
    fn finish_chunk_carries_stop_and_usage() {
        let chunk = ChatCompletionChunk::finish("id", "chat", "", Usage::default());
        assert_eq!(chunk.finish_reason(), Some("stop"));
        assert_eq!(chunk.usage, Some(Usage::default()));
    }

    #[test]
    fn request_credentials_are_not_deserialized() {
        let req: CompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "chat",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true,
            "credentials": ["leak"]
        }))
        .unwrap();
        assert!(req.stream);
        assert!(req.credentials.is_empty());
    }
}
