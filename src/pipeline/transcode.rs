//! Stream transcoder: vendor frames in, one aggregate envelope or a chunk sequence out.
//!
//! Streaming contract:
//! - role-open chunk, then one chunk per non-empty increment, then a `stop` chunk with
//!   usage, then `data: [DONE]`
//! - the sentinel is always written last and nothing is written after it
//! - the outcome (resolved conversation id + how the stream ended) is reported exactly
//!   once through a `oneshot` completion future

use crate::pipeline::accumulate::{Accumulator, Notices};
use crate::types::completion::{ChatCompletion, ChatCompletionChunk, Usage, DONE_FRAME};
use crate::types::vendor::VendorFrame;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// How a transcoding run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStatus {
    /// Terminal record seen.
    Completed,
    /// Input ended (or `[DONE]`) before a terminal record; partial content was delivered.
    Incomplete,
    /// Transport, protocol or business failure.
    Failed,
    /// The caller stopped reading.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    pub conversation_id: Option<String>,
    pub status: TranscodeStatus,
}

impl TranscodeOutcome {
    /// Whether server-side conversation state should be deleted after this run.
    pub fn should_cleanup(&self) -> bool {
        self.conversation_id.is_some() && self.status != TranscodeStatus::Failed
    }
}

/// Bounded outbound queue towards the caller.
///
/// Overflow policy: a write waits for capacity up to `send_timeout`; a timeout or a
/// dropped receiver marks the caller as disconnected and all later writes are refused.
pub struct OutboundSink {
    tx: mpsc::Sender<Bytes>,
    send_timeout: Duration,
    sealed: bool,
    disconnected: bool,
}

impl OutboundSink {
    pub fn channel(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                send_timeout,
                sealed: false,
                disconnected: false,
            },
            rx,
        )
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Queue one frame. Returns `false` once the caller is gone or the sink is sealed.
    pub async fn write(&mut self, frame: Bytes) -> bool {
        if self.sealed {
            warn!("dropping write after end-of-stream sentinel");
            return false;
        }
        if self.disconnected {
            return false;
        }
        match tokio::time::timeout(self.send_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!("caller dropped the response stream");
                self.disconnected = true;
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "outbound queue stayed full; treating caller as disconnected"
                );
                self.disconnected = true;
                false
            }
        }
    }

    /// Resolves once the caller dropped the receiving end; marks the sink disconnected.
    pub async fn closed(&mut self) {
        self.tx.closed().await;
        if !self.disconnected {
            debug!("caller dropped the response stream");
            self.disconnected = true;
        }
    }

    /// Write the `[DONE]` sentinel (once). No write is accepted afterwards.
    pub async fn seal(&mut self) {
        if self.sealed {
            return;
        }
        if !self.disconnected {
            self.write(Bytes::from_static(DONE_FRAME.as_bytes())).await;
        }
        self.sealed = true;
    }
}

/// Drives an [`Accumulator`] over a frame stream.
#[derive(Debug, Clone)]
pub struct Transcoder {
    model: String,
    notices: Notices,
    stream_image_content: bool,
}

impl Transcoder {
    pub fn new(model: impl Into<String>, notices: Notices) -> Self {
        Self {
            model: model.into(),
            notices,
            stream_image_content: false,
        }
    }

    pub fn with_image_streaming(mut self, enable: bool) -> Self {
        self.stream_image_content = enable;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn accumulator(&self) -> Accumulator {
        Accumulator::new(self.notices.clone()).with_image_streaming(self.stream_image_content)
    }

    /// Buffer the whole answer into one envelope.
    ///
    /// A transport close without a terminal record resolves with the partial content.
    pub async fn aggregate(
        &self,
        mut frames: BoxStream<'static, VendorFrame>,
    ) -> Result<(ChatCompletion, TranscodeOutcome)> {
        let mut acc = self.accumulator();

        while let Some(item) = frames.next().await {
            match item? {
                VendorFrame::Record(record) => {
                    acc.ingest(&record)?;
                    if acc.is_finished() {
                        break;
                    }
                }
                VendorFrame::Fault { code, message } => {
                    return Err(Error::business(Some(code), message));
                }
                VendorFrame::Done => break,
            }
        }

        let status = if acc.is_finished() {
            TranscodeStatus::Completed
        } else {
            warn!(
                partial_len = acc.content().len(),
                "vendor stream closed before the terminal record; returning partial content"
            );
            TranscodeStatus::Incomplete
        };

        let conversation_id = acc.conversation_id().map(str::to_string);
        let completion = ChatCompletion::new(
            conversation_id.clone().unwrap_or_default(),
            self.model.clone(),
            acc.content(),
        );
        Ok((
            completion,
            TranscodeOutcome {
                conversation_id,
                status,
            },
        ))
    }

    /// Translate frames into chunk frames written to `sink`. Always seals the sink.
    pub async fn stream(
        &self,
        mut frames: BoxStream<'static, VendorFrame>,
        sink: &mut OutboundSink,
    ) -> TranscodeOutcome {
        let mut acc = self.accumulator();
        let mut opened = false;

        let status = loop {
            // A caller that stops reading must not keep the upstream read pending.
            let item = tokio::select! {
                item = frames.next() => match item {
                    Some(item) => item,
                    None => break TranscodeStatus::Incomplete,
                },
                _ = sink.closed() => break TranscodeStatus::Disconnected,
            };
            let record = match item {
                Ok(VendorFrame::Record(record)) => record,
                Ok(VendorFrame::Done) => break TranscodeStatus::Incomplete,
                Ok(VendorFrame::Fault { code, message }) => {
                    warn!(code = code.as_str(), message = message.as_str(), "vendor reported a fault mid-stream");
                    break TranscodeStatus::Failed;
                }
                Err(e) => {
                    warn!(error = %e, "vendor stream failed mid-response");
                    break TranscodeStatus::Failed;
                }
            };

            let increment = match acc.ingest(&record) {
                Ok(increment) => increment,
                Err(e) => {
                    warn!(error = %e, "unusable vendor answer");
                    break TranscodeStatus::Failed;
                }
            };
            let id = acc.conversation_id().unwrap_or_default().to_string();

            if !opened {
                opened = true;
                if !self.emit(sink, ChatCompletionChunk::role_open(&id, &self.model)).await {
                    break TranscodeStatus::Disconnected;
                }
            }
            if !increment.delta.is_empty()
                && !self
                    .emit(sink, ChatCompletionChunk::content(&id, &self.model, increment.delta))
                    .await
            {
                break TranscodeStatus::Disconnected;
            }
            if increment.terminal {
                if !self.emit_finish(sink, &id).await {
                    break TranscodeStatus::Disconnected;
                }
                break TranscodeStatus::Completed;
            }
        };

        if status == TranscodeStatus::Incomplete {
            warn!(
                emitted_len = acc.content().len(),
                "vendor stream closed before the terminal record"
            );
            let id = acc.conversation_id().unwrap_or_default().to_string();
            let still_there = opened
                || self.emit(sink, ChatCompletionChunk::role_open(&id, &self.model)).await;
            if still_there {
                self.emit_finish(sink, &id).await;
            }
        }

        sink.seal().await;

        TranscodeOutcome {
            conversation_id: acc.conversation_id().map(str::to_string),
            status: if sink.is_disconnected() && status != TranscodeStatus::Failed {
                TranscodeStatus::Disconnected
            } else {
                status
            },
        }
    }

    /// Run [`Transcoder::stream`] on its own task behind a bounded queue.
    ///
    /// Returns the SSE body for the caller and the completion future.
    pub fn spawn_stream(
        self,
        frames: BoxStream<'static, VendorFrame>,
        queue_capacity: usize,
        send_timeout: Duration,
    ) -> (BoxStream<'static, Bytes>, oneshot::Receiver<TranscodeOutcome>) {
        let (mut sink, rx) = OutboundSink::channel(queue_capacity, send_timeout);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let outcome = self.stream(frames, &mut sink).await;
            let _ = done_tx.send(outcome);
        });

        let body = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        (Box::pin(body), done_rx)
    }

    async fn emit(&self, sink: &mut OutboundSink, chunk: ChatCompletionChunk) -> bool {
        match chunk.to_sse_frame() {
            Ok(frame) => sink.write(frame).await,
            Err(e) => {
                warn!(error = %e, "failed to encode completion chunk");
                !sink.is_disconnected()
            }
        }
    }

    async fn emit_finish(&self, sink: &mut OutboundSink, id: &str) -> bool {
        self.emit(
            sink,
            ChatCompletionChunk::finish(id, &self.model, "", Usage::default()),
        )
        .await
    }
}
