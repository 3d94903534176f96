//! 会话生命周期：每个逻辑请求一个传输会话，结束后关闭并异步清理服务端会话状态。
//!
//! Session lifecycle.
//!
//! - [`SessionGuard`] owns the one transport session of a logical request and closes it
//!   exactly once, whichever exit path is taken (explicit close, error path, or drop)
//! - [`SessionLifecycle`] observes the transcoder's completion future, closes the
//!   session and schedules best-effort deletion of the vendor conversation

use crate::pipeline::TranscodeOutcome;
use crate::transport::{VendorSession, VendorTransport};
use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static CONVERSATION_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<session>[^\s-]+)-(?P<msg>\S+)$").expect("conversation reference pattern is valid")
});

/// A `sessionId-msgId` conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    pub session_id: String,
    pub msg_id: String,
}

impl ConversationRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let caps = CONVERSATION_REF.captures(raw.trim()).ok_or_else(|| {
            Error::validation_with_context(
                format!("malformed conversation reference '{}'", raw),
                ErrorContext::new()
                    .with_field_path("request.conversation_id")
                    .with_details("expected sessionId-msgId"),
            )
        })?;
        Ok(Self {
            session_id: caps["session"].to_string(),
            msg_id: caps["msg"].to_string(),
        })
    }
}

impl std::fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.session_id, self.msg_id)
    }
}

/// Owns one open transport session.
pub struct SessionGuard {
    session: Option<Box<dyn VendorSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn VendorSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_mut(&mut self) -> Result<&mut Box<dyn VendorSession>> {
        self.session.as_mut().ok_or_else(|| {
            Error::Transport(crate::transport::TransportError::Other(
                "session already closed".to_string(),
            ))
        })
    }

    /// Close the session. Later calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            debug!("vendor session closed");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.close().await;
                    debug!("vendor session closed on drop");
                });
            }
            Err(_) => warn!("session dropped outside a runtime; connection released without close"),
        }
    }
}

/// Post-response bookkeeping: close, then fire-and-forget conversation deletion.
#[derive(Clone)]
pub struct SessionLifecycle {
    transport: Arc<dyn VendorTransport>,
    delete_path: String,
}

impl SessionLifecycle {
    pub fn new(transport: Arc<dyn VendorTransport>, delete_path: impl Into<String>) -> Self {
        Self {
            transport,
            delete_path: delete_path.into(),
        }
    }

    /// Close the session and, when the outcome allows it, schedule cleanup.
    pub async fn finish(
        &self,
        mut guard: SessionGuard,
        credential: &str,
        outcome: &TranscodeOutcome,
    ) -> Option<JoinHandle<()>> {
        guard.close().await;
        if !outcome.should_cleanup() {
            return None;
        }
        let conversation_id = outcome.conversation_id.as_deref()?;
        self.schedule_cleanup(credential, conversation_id)
    }

    /// Wait for the transcoder's completion future on a background task, then
    /// [`finish`](Self::finish). The task resolves once cleanup has been scheduled.
    pub fn supervise(
        &self,
        guard: SessionGuard,
        credential: impl Into<String>,
        completion: oneshot::Receiver<TranscodeOutcome>,
    ) -> JoinHandle<()> {
        let lifecycle = self.clone();
        let credential = credential.into();
        tokio::spawn(async move {
            match completion.await {
                Ok(outcome) => {
                    info!(
                        conversation_id = outcome.conversation_id.as_deref().unwrap_or(""),
                        status = ?outcome.status,
                        "stream finished"
                    );
                    lifecycle.finish(guard, &credential, &outcome).await;
                }
                Err(_) => {
                    warn!("transcoder ended without reporting an outcome");
                    let mut guard = guard;
                    guard.close().await;
                }
            }
        })
    }

    /// Best-effort deletion of server-side conversation state. Failures are logged only.
    pub fn schedule_cleanup(&self, credential: &str, conversation_id: &str) -> Option<JoinHandle<()>> {
        let conversation = match ConversationRef::parse(conversation_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(conversation_id, error = %e, "cannot schedule cleanup");
                return None;
            }
        };
        let transport = self.transport.clone();
        let path = self.delete_path.clone();
        let credential = credential.to_string();
        Some(tokio::spawn(async move {
            let body = json!({ "sessionId": conversation.session_id });
            match transport.post_json(&credential, &path, &body).await {
                Ok(_) => debug!(session_id = conversation.session_id.as_str(), "conversation deleted"),
                Err(e) => warn!(
                    session_id = conversation.session_id.as_str(),
                    error = %e,
                    "conversation cleanup failed"
                ),
            }
        }))
    }
}
