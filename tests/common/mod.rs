//! Scripted in-memory vendor transport shared by the integration tests.

#![allow(dead_code)]

use ai_relay_rust::transport::{
    FileUpload, RemoteFileInfo, TransportError, VendorSession, VendorTransport,
};
use ai_relay_rust::{BoxStream, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the next opened session does.
#[derive(Debug, Clone)]
pub enum SessionScript {
    /// Opening the session fails with a transport error.
    OpenFails,
    /// Sending the request fails with a transport error.
    SendFails,
    /// The request is accepted and the body yields these chunks.
    Body(Vec<String>),
    /// The body yields these chunks, then a transport error.
    BodyThenError(Vec<String>),
    /// The body yields these chunks, then never produces anything again.
    BodyThenStall(Vec<String>),
}

#[derive(Default)]
pub struct ScriptedTransport {
    sessions: Mutex<VecDeque<SessionScript>>,
    replies: Mutex<HashMap<String, VecDeque<Option<Value>>>>,
    remote_files: Mutex<HashMap<String, (RemoteFileInfo, Bytes)>>,
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub sent: Arc<Mutex<Vec<Value>>>,
    pub posts: Mutex<Vec<(String, Value)>>,
    pub uploads: Mutex<Vec<(String, usize)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_session(&self, script: SessionScript) {
        self.sessions.lock().unwrap().push_back(script);
    }

    /// Queue a JSON reply for `path`; `None` makes the call fail with a transport error.
    pub fn push_reply(&self, path: &str, reply: Option<Value>) {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn add_remote_file(&self, url: &str, content_type: &str, bytes: &[u8], advertised_len: Option<u64>) {
        self.remote_files.lock().unwrap().insert(
            url.to_string(),
            (
                RemoteFileInfo {
                    content_length: advertised_len,
                    content_type: Some(content_type.to_string()),
                },
                Bytes::copy_from_slice(bytes),
            ),
        );
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn posts_to(&self, path: &str) -> Vec<Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn transport_error(msg: &str) -> Error {
    Error::Transport(TransportError::Other(msg.to_string()))
}

#[async_trait]
impl VendorTransport for ScriptedTransport {
    async fn open_session(&self, _credential: &str) -> Result<Box<dyn VendorSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SessionScript::SendFails);
        if matches!(script, SessionScript::OpenFails) {
            return Err(transport_error("connect refused"));
        }
        Ok(Box::new(ScriptedSession {
            script: Some(script),
            closes: self.closes.clone(),
            sent: self.sent.clone(),
            closed: false,
        }))
    }

    async fn post_json(&self, _credential: &str, path: &str, body: &Value) -> Result<Value> {
        self.posts
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(|q| q.pop_front());
        match reply {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(transport_error("service unavailable")),
            None => Ok(json!({})),
        }
    }

    async fn upload(&self, _credential: &str, path: &str, file: FileUpload) -> Result<Value> {
        self.uploads
            .lock()
            .unwrap()
            .push((file.name.clone(), file.bytes.len()));
        self.post_json("", path, &json!({ "name": file.name })).await
    }

    async fn probe(&self, url: &str) -> Result<RemoteFileInfo> {
        self.remote_files
            .lock()
            .unwrap()
            .get(url)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| {
                Error::Transport(TransportError::Status {
                    status: 404,
                    body: "not found".into(),
                })
            })
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.remote_files
            .lock()
            .unwrap()
            .get(url)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| transport_error("not found"))
    }
}

pub struct ScriptedSession {
    script: Option<SessionScript>,
    closes: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Value>>>,
    closed: bool,
}

#[async_trait]
impl VendorSession for ScriptedSession {
    async fn send(&mut self, _path: &str, payload: &Value) -> Result<BoxStream<'static, Bytes>> {
        self.sent.lock().unwrap().push(payload.clone());
        let items: Vec<Result<Bytes>> = match self.script.take() {
            Some(SessionScript::Body(chunks)) => chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect(),
            Some(SessionScript::BodyThenError(chunks)) => chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c)))
                .chain(std::iter::once(Err(transport_error("connection reset"))))
                .collect(),
            Some(SessionScript::BodyThenStall(chunks)) => {
                let items: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
                return Ok(Box::pin(
                    futures::stream::iter(items).chain(futures::stream::pending::<Result<Bytes>>()),
                ));
            }
            _ => return Err(transport_error("request rejected")),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One cumulative generated-image record as an SSE frame.
pub fn image_frame(status: &str, text: &str) -> String {
    let record = json!({
        "sessionId": "sess1",
        "msgId": "msg1",
        "contentType": "text2image",
        "msgStatus": status,
        "incremental": true,
        "contents": [{"content": text, "contentType": "text2image", "role": "assistant", "status": status}]
    });
    format!("event: message\ndata: {}\n\n", record)
}

/// One cumulative text record as an SSE frame.
pub fn text_frame(status: &str, text: &str) -> String {
    let record = json!({
        "sessionId": "sess1",
        "msgId": "msg1",
        "contentType": "text",
        "msgStatus": status,
        "incremental": true,
        "canShare": true,
        "contents": [{"content": text, "contentType": "text", "role": "assistant", "status": status}]
    });
    format!("event: message\ndata: {}\n\n", record)
}

pub fn hello_world_frames() -> Vec<String> {
    vec![
        text_frame("generating", "Hel"),
        text_frame("generating", "Hello, wor"),
        text_frame("generating", "Hello, world"),
        text_frame("finished", "Hello, world!"),
    ]
}

/// Wait until spawned background work (session supervision, cleanup) has run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
