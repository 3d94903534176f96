//! Execution paths behind [`RelayClient::complete`].

use crate::client::chat::PreparedRequest;
use crate::client::core::RelayClient;
use crate::config::ModelVariant;
use crate::pipeline::{decode_frames, Transcoder};
use crate::session::SessionGuard;
use crate::types::completion::{ChatCompletion, ChatCompletionChunk, Usage, DONE_FRAME};
use crate::types::{CompletionRequest, CompletionResponse};
use crate::{BoxStream, Result};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info};

impl RelayClient {
    /// Non-streaming: one retry unit covers open, send, transcode and cleanup.
    pub(crate) async fn execute_aggregate(
        &self,
        credential: &str,
        payload: &Value,
        transcoder: &Transcoder,
    ) -> Result<CompletionResponse> {
        let path = self.config.endpoints.conversation.as_str();
        let completion = self
            .envelope
            .run(|ctx| async move {
                let session = self.transport.open_session(credential).await?;
                let mut guard = SessionGuard::new(session);

                let sent = match guard.session_mut() {
                    Ok(session) => session.send(path, payload).await,
                    Err(e) => Err(e),
                };
                let result = match sent {
                    Ok(body) => transcoder.aggregate(decode_frames(body)).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok((completion, outcome)) => {
                        debug!(attempt = ctx.attempt, status = ?outcome.status, "vendor answer aggregated");
                        self.lifecycle.finish(guard, credential, &outcome).await;
                        Ok(completion)
                    }
                    Err(e) => {
                        guard.close().await;
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(CompletionResponse::Aggregate(completion))
    }

    /// Streaming: the retry unit covers open and send up to the response headers. Once
    /// the body is handed to the transcoder the request is committed.
    pub(crate) async fn execute_stream(
        &self,
        credential: String,
        payload: Value,
        transcoder: Transcoder,
    ) -> Result<CompletionResponse> {
        let path = self.config.endpoints.conversation.as_str();
        let credential_ref = credential.as_str();
        let payload_ref = &payload;

        let (guard, body) = self
            .envelope
            .run(|ctx| async move {
                let session = self.transport.open_session(credential_ref).await?;
                let mut guard = SessionGuard::new(session);
                let sent = match guard.session_mut() {
                    Ok(session) => session.send(path, payload_ref).await,
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(body) => {
                        debug!(attempt = ctx.attempt, "vendor accepted streaming request");
                        Ok((guard, body))
                    }
                    Err(e) => {
                        guard.close().await;
                        Err(e)
                    }
                }
            })
            .await?;

        let stream = &self.config.stream;
        let (sse, completion) =
            transcoder.spawn_stream(decode_frames(body), stream.queue_capacity, stream.send_timeout());
        self.lifecycle.supervise(guard, credential, completion);
        Ok(CompletionResponse::Stream(sse))
    }

    /// Video variants: submit a generation job and wait for its asset URL.
    pub(crate) async fn execute_generation(
        &self,
        credential: &str,
        request: &CompletionRequest,
        prepared: &PreparedRequest,
        variant: &ModelVariant,
    ) -> Result<CompletionResponse> {
        let handle = self
            .generation
            .submit(credential, &prepared.prompt, &variant.name)
            .await?;
        let url = self.generation.wait(credential, &handle).await?;
        info!(task_id = handle.task_id.as_str(), "generation answer ready");

        if !request.stream {
            return Ok(CompletionResponse::Aggregate(ChatCompletion::new(
                handle.task_id,
                request.model.clone(),
                url,
            )));
        }

        let id = handle.task_id.as_str();
        let model = request.model.as_str();
        let mut frames = Vec::with_capacity(4);
        for chunk in [
            ChatCompletionChunk::role_open(id, model),
            ChatCompletionChunk::content(id, model, url),
            ChatCompletionChunk::finish(id, model, "", Usage::default()),
        ] {
            frames.push(chunk.to_sse_frame()?);
        }
        frames.push(Bytes::from_static(DONE_FRAME.as_bytes()));

        let body: BoxStream<'static, Bytes> = Box::pin(futures::stream::iter(frames.into_iter().map(Ok)));
        Ok(CompletionResponse::Stream(body))
    }
}
