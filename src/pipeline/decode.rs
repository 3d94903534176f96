//! SSE event parser (Bytes -> VendorEvent) and frame decoding (VendorEvent -> VendorFrame).
//!
//! Buffering happens on raw bytes: a line is only decoded once its terminator has
//! arrived, so a multi-byte character split across transport chunks is reassembled
//! instead of being replaced with U+FFFD here. A terminated line that still is not
//! valid UTF-8 ends the stream with [`PipelineError::Decoder`].

use crate::pipeline::PipelineError;
use crate::types::vendor::{VendorFrame, VendorRecord};
use crate::{BoxStream, Error};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::trace;

const DEFAULT_EVENT: &str = "message";
const DONE_SIGNAL: &str = "[DONE]";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorEvent {
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental SSE tokenizer. One parser per stream; create a fresh one to restart.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    // a `\r` terminated the previous line; swallow a directly following `\n`
    skip_lf: bool,
    error: Option<PipelineError>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return every event it completed.
    ///
    /// After a decoding failure no further events are produced; see [`SseParser::take_error`].
    pub fn push(&mut self, chunk: &[u8]) -> Vec<VendorEvent> {
        if self.error.is_some() {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);
        let buf = std::mem::take(&mut self.buf);
        let mut events = Vec::new();
        let mut line_start = 0;
        let mut i = 0;

        while i < buf.len() {
            let b = buf[i];
            if self.skip_lf {
                self.skip_lf = false;
                if b == b'\n' {
                    i += 1;
                    line_start = i;
                    continue;
                }
            }
            if b == b'\n' || b == b'\r' {
                if let Some(event) = self.process_line(&buf[line_start..i]) {
                    events.push(event);
                }
                self.skip_lf = b == b'\r';
                i += 1;
                line_start = i;
                if self.error.is_some() {
                    break;
                }
            } else {
                i += 1;
            }
        }

        self.buf = buf[line_start..].to_vec();
        events
    }

    /// End of input: flush an unterminated last line and any pending event.
    pub fn finish(&mut self) -> Option<VendorEvent> {
        if self.error.is_some() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        if !rest.is_empty() {
            if let Some(event) = self.process_line(&rest) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    /// The decoding failure that stopped this parser, if any.
    pub fn take_error(&mut self) -> Option<PipelineError> {
        self.error.take()
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<VendorEvent> {
        if raw.is_empty() {
            return self.dispatch();
        }
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                self.error = Some(PipelineError::Decoder(format!(
                    "event stream line is not valid UTF-8: {}",
                    e
                )));
                return None;
            }
        };

        // Comment / heartbeat
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            _ => trace!(field, "skipping unrecognized SSE line"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<VendorEvent> {
        let event_type = self.event_type.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(VendorEvent {
            event_type: event_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

/// Lazily tokenize a byte stream into events. Transport errors are forwarded in order.
pub fn parse_events(input: BoxStream<'static, Bytes>) -> BoxStream<'static, VendorEvent> {
    let state = (input, SseParser::new(), VecDeque::new(), None, false);
    let stream = stream::unfold(
        state,
        |(mut input, mut parser, mut pending, mut failure, mut finished)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (input, parser, pending, failure, finished)));
                }
                if let Some(e) = failure.take() {
                    // nothing after an error is trustworthy
                    return Some((Err(e), (input, parser, pending, None, true)));
                }
                if finished {
                    return None;
                }
                match input.next().await {
                    Some(Ok(bytes)) => {
                        pending.extend(parser.push(&bytes));
                        if let Some(e) = parser.take_error() {
                            failure = Some(Error::UpstreamProtocol(e));
                            finished = true;
                        }
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        finished = true;
                    }
                    None => {
                        finished = true;
                        pending.extend(parser.finish());
                        failure = parser.take_error().map(Error::UpstreamProtocol);
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

/// Decode one event into a tagged frame. `Ok(None)` means the event is skipped.
pub fn decode_frame(event: &VendorEvent) -> Result<Option<VendorFrame>, PipelineError> {
    if event.event_type != DEFAULT_EVENT {
        trace!(event_type = event.event_type.as_str(), "skipping non-message event");
        return Ok(None);
    }

    let data = event.data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == DONE_SIGNAL {
        return Ok(Some(VendorFrame::Done));
    }

    let value: Value = serde_json::from_str(data).map_err(|e| {
        PipelineError::MalformedPayload {
            event: event.event_type.clone(),
            reason: e.to_string(),
            hint: None,
        }
        .with_hint("the vendor sent a non-JSON `data:` payload; the attempt will be retried")
    })?;

    let Some(obj) = value.as_object() else {
        trace!("skipping non-object vendor payload");
        return Ok(None);
    };

    if obj.contains_key("contents") || obj.contains_key("msgStatus") {
        let record: VendorRecord =
            serde_json::from_value(value).map_err(|e| PipelineError::MalformedPayload {
                event: event.event_type.clone(),
                reason: e.to_string(),
                hint: None,
            })?;
        return Ok(Some(VendorFrame::Record(Box::new(record))));
    }

    if let Some(code) = obj
        .get("errorCode")
        .and_then(|v| v.as_str())
        .filter(|c| !c.is_empty())
    {
        let message = obj
            .get("errorMsg")
            .or_else(|| obj.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        return Ok(Some(VendorFrame::Fault {
            code: code.to_string(),
            message: message.to_string(),
        }));
    }

    trace!("skipping vendor payload of unknown shape");
    Ok(None)
}

/// Full decoding stage: bytes in, tagged frames out.
pub fn decode_frames(input: BoxStream<'static, Bytes>) -> BoxStream<'static, VendorFrame> {
    let frames = parse_events(input).filter_map(|item| async move {
        match item {
            Ok(event) => match decode_frame(&event) {
                Ok(Some(frame)) => Some(Ok(frame)),
                Ok(None) => None,
                Err(e) => Some(Err(Error::UpstreamProtocol(e))),
            },
            Err(e) => Some(Err(e)),
        }
    });
    Box::pin(frames)
}
