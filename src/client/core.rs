use crate::client::builder::RelayClientBuilder;
use crate::client::chat::{self, PreparedRequest};
use crate::config::{RelayConfig, VariantKind};
use crate::credentials::CredentialPool;
use crate::files::{FilePipeline, ReferenceDescriptor};
use crate::generation::GenerationJobs;
use crate::pipeline::Transcoder;
use crate::resilience::RetryEnvelope;
use crate::session::SessionLifecycle;
use crate::transport::VendorTransport;
use crate::types::{CompletionRequest, CompletionResponse};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Translates completion requests into vendor exchanges.
///
/// Cheap to share behind an `Arc`; every request runs as its own task with no shared
/// mutable state.
pub struct RelayClient {
    pub(crate) config: Arc<RelayConfig>,
    pub(crate) transport: Arc<dyn VendorTransport>,
    pub(crate) envelope: RetryEnvelope,
    pub(crate) files: FilePipeline,
    pub(crate) generation: GenerationJobs,
    pub(crate) lifecycle: SessionLifecycle,
}

impl RelayClient {
    pub fn builder() -> RelayClientBuilder {
        RelayClientBuilder::new()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run one completion request.
    ///
    /// Streaming requests resolve once the vendor accepted the request; the returned
    /// body then yields chunk frames and always ends with `data: [DONE]`.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let started = Instant::now();
        let prepared = chat::prepare(&request)?;
        let pool = CredentialPool::new(request.credentials.iter().cloned())?;
        let credential = pool.pick(&mut rand::thread_rng()).to_string();
        let variant = self.config.resolve_variant(&request.model)?.clone();

        info!(
            model = request.model.as_str(),
            variant = variant.name.as_str(),
            stream = request.stream,
            files = prepared.files.len(),
            continued = prepared.conversation.is_some(),
            "completion request"
        );

        let response = match variant.kind {
            VariantKind::Video => {
                self.execute_generation(&credential, &request, &prepared, &variant)
                    .await?
            }
            VariantKind::Chat => {
                let references = self.upload_references(&credential, &prepared).await?;
                let payload = chat::compile_payload(&prepared, &variant, &references);
                let transcoder = Transcoder::new(request.model.clone(), self.config.notices.clone())
                    .with_image_streaming(variant.stream_image_content);
                if request.stream {
                    self.execute_stream(credential, payload, transcoder).await?
                } else {
                    self.execute_aggregate(&credential, &payload, &transcoder)
                        .await?
                }
            }
        };

        info!(
            model = request.model.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion request accepted"
        );
        Ok(response)
    }

    /// File reference pipeline; any failure aborts before a session is opened.
    async fn upload_references(
        &self,
        credential: &str,
        prepared: &PreparedRequest,
    ) -> Result<Vec<ReferenceDescriptor>> {
        let mut references = Vec::with_capacity(prepared.files.len());
        for file in &prepared.files {
            references.push(self.files.upload(credential, file).await?);
        }
        Ok(references)
    }
}
