use crate::client::core::RelayClient;
use crate::config::RelayConfig;
use crate::files::FilePipeline;
use crate::generation::GenerationJobs;
use crate::resilience::{Clock, RetryEnvelope, TokioClock};
use crate::session::SessionLifecycle;
use crate::transport::{HttpTransport, VendorTransport};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Builder for [`RelayClient`].
///
/// Keep this surface area small and predictable: configuration, plus the two seams
/// tests replace (transport and clock).
pub struct RelayClientBuilder {
    config: Option<RelayConfig>,
    base_url: Option<String>,
    transport: Option<Arc<dyn VendorTransport>>,
    clock: Option<Arc<dyn Clock>>,
    env_overrides: bool,
}

impl RelayClientBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            base_url: None,
            transport: None,
            clock: None,
            env_overrides: true,
        }
    }

    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the vendor origin of the configuration.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Use a custom transport instead of [`HttpTransport`].
    pub fn transport(mut self, transport: Arc<dyn VendorTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sleep source for retry backoff and polling. Defaults to the tokio timer.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Apply `AI_RELAY_*` environment overrides on build (default on).
    pub fn env_overrides(mut self, enable: bool) -> Self {
        self.env_overrides = enable;
        self
    }

    pub fn build(self) -> Result<RelayClient> {
        let mut config = self.config.unwrap_or_default();
        if self.env_overrides {
            config.apply_env_overrides();
        }
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        config.validate()?;

        let transport: Arc<dyn VendorTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(TokioClock));

        debug!(
            base_url = config.base_url.as_str(),
            max_attempts = config.retry.max_attempts,
            variants = config.variants.len(),
            "relay client built"
        );

        Ok(RelayClient {
            envelope: RetryEnvelope::new(config.retry, clock.clone()),
            files: FilePipeline::new(transport.clone(), &config, clock.clone()),
            generation: GenerationJobs::new(transport.clone(), &config, clock),
            lifecycle: SessionLifecycle::new(transport.clone(), config.endpoints.delete_session.clone()),
            transport,
            config: Arc::new(config),
        })
    }
}

impl Default for RelayClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
