//! Request preparation: validation, message flattening and vendor payload compilation.

use crate::config::ModelVariant;
use crate::files::{FileRef, ReferenceDescriptor};
use crate::session::ConversationRef;
use crate::types::message::{Message, MessageRole};
use crate::types::CompletionRequest;
use crate::{Error, ErrorContext, Result};
use serde_json::{json, Value};
use uuid::Uuid;

/// What is actually sent to the vendor for one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedRequest {
    pub prompt: String,
    pub files: Vec<FileRef>,
    pub conversation: Option<ConversationRef>,
}

pub(crate) fn prepare(request: &CompletionRequest) -> Result<PreparedRequest> {
    if request.messages.is_empty() {
        return Err(Error::validation_with_context(
            "messages must not be empty",
            ErrorContext::new()
                .with_field_path("request.messages")
                .with_source("request_validator"),
        ));
    }

    let conversation = request
        .conversation_id
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(ConversationRef::parse)
        .transpose()?;

    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .ok_or_else(|| {
            Error::validation_with_context(
                "at least one user message is required",
                ErrorContext::new()
                    .with_field_path("request.messages")
                    .with_source("request_validator"),
            )
        })?;

    // A continued conversation already holds the history server-side.
    let prompt = if conversation.is_some() || request.messages.len() == 1 {
        last_user.text()
    } else {
        flatten_transcript(&request.messages)
    };

    let files = last_user
        .file_refs()
        .into_iter()
        .map(FileRef::parse)
        .collect::<Result<Vec<_>>>()?;

    Ok(PreparedRequest {
        prompt,
        files,
        conversation,
    })
}

fn flatten_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}:{}\n", m.role.as_str(), m.text()))
        .collect()
}

/// Vendor conversation POST body.
pub(crate) fn compile_payload(
    prepared: &PreparedRequest,
    variant: &ModelVariant,
    references: &[ReferenceDescriptor],
) -> Value {
    let (session_id, parent_msg_id) = prepared
        .conversation
        .as_ref()
        .map(|c| (c.session_id.as_str(), c.msg_id.as_str()))
        .unwrap_or(("", ""));

    let mut contents = vec![json!({
        "role": "user",
        "contentType": "text",
        "content": prepared.prompt,
    })];
    contents.extend(references.iter().map(ReferenceDescriptor::to_vendor_content));

    let batch_id = if references.is_empty() {
        String::new()
    } else {
        Uuid::new_v4().to_string()
    };

    json!({
        "mode": "chat",
        "action": "next",
        "userAction": "chat",
        "requestId": Uuid::new_v4().to_string(),
        "sessionId": session_id,
        "sessionType": variant.session_type,
        "parentMsgId": parent_msg_id,
        "model": variant.name,
        "params": { "fileUploadBatchId": batch_id },
        "contents": contents,
    })
}
