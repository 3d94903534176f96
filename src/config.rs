//! Relay configuration.
//!
//! Loaded from YAML (every field has a default) and then overridden from the
//! environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_RELAY_BASE_URL` | `base_url` |
//! | `AI_RELAY_TIMEOUT_SECS` | `timeout_secs` |
//! | `AI_RELAY_MAX_ATTEMPTS` | `retry.max_attempts` |
//! | `AI_RELAY_BACKOFF_MS` | `retry.backoff_ms` |
//! | `AI_RELAY_PROXY_URL` | `proxy_url` |

use crate::pipeline::Notices;
use crate::resilience::{PollSpec, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Vendor origin, e.g. `https://chat.vendor.example`.
    pub base_url: String,
    /// Whole-request timeout for vendor calls, streaming bodies included.
    pub timeout_secs: u64,
    pub proxy_url: Option<String>,
    pub auth: AuthConfig,
    pub endpoints: EndpointPaths,
    pub retry: RetryPolicy,
    pub poll: PollConfig,
    pub files: FileConfig,
    pub stream: StreamConfig,
    pub notices: Notices,
    pub variants: Vec<ModelVariant>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 300,
            proxy_url: None,
            auth: AuthConfig::default(),
            endpoints: EndpointPaths::default(),
            retry: RetryPolicy::default(),
            poll: PollConfig::default(),
            files: FileConfig::default(),
            stream: StreamConfig::default(),
            notices: Notices::default(),
            variants: ModelVariant::defaults(),
        }
    }
}

/// How a credential is attached to vendor requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub header: String,
    /// `{credential}` is substituted.
    pub template: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: "authorization".to_string(),
            template: "Bearer {credential}".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn header_value(&self, credential: &str) -> String {
        self.template.replace("{credential}", credential)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub conversation: String,
    pub delete_session: String,
    pub file_upload: String,
    pub file_status: String,
    pub generation_submit: String,
    pub generation_status: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            conversation: "/dialog/conversation".to_string(),
            delete_session: "/dialog/session/delete".to_string(),
            file_upload: "/dialog/file/upload".to_string(),
            file_status: "/dialog/file/status".to_string(),
            generation_submit: "/generation/task/submit".to_string(),
            generation_status: "/generation/task/status".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub safety_scan: PollSpec,
    pub generation: PollSpec,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            safety_scan: PollSpec::safety_scan(),
            generation: PollSpec::generation(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub max_file_size: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

/// Outbound queue towards streaming callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub queue_capacity: usize,
    pub send_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            send_timeout_ms: 30_000,
        }
    }
}

impl StreamConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// Answered through the conversation event stream.
    Chat,
    /// Answered through a submitted generation job.
    Video,
}

/// A model variant exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVariant {
    pub name: String,
    pub kind: VariantKind,
    #[serde(default)]
    pub session_type: String,
    /// Emit generated-image content while generating instead of at the end.
    #[serde(default)]
    pub stream_image_content: bool,
}

impl ModelVariant {
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "chat".to_string(),
                kind: VariantKind::Chat,
                session_type: "chat".to_string(),
                stream_image_content: false,
            },
            Self {
                name: "chat-image".to_string(),
                kind: VariantKind::Chat,
                session_type: "text2image".to_string(),
                stream_image_content: false,
            },
            Self {
                name: "video".to_string(),
                kind: VariantKind::Video,
                session_type: "video".to_string(),
                stream_image_content: false,
            },
        ]
    }
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid relay configuration: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })
    }

    /// Read a YAML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), variants = config.variants.len(), "relay configuration loaded");
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = raw.as_str(), "ignoring unparsable override");
                    None
                }
            }
        }

        if let Some(url) = lookup("AI_RELAY_BASE_URL").filter(|s| !s.is_empty()) {
            self.base_url = url;
        }
        if let Some(v) = parsed("AI_RELAY_TIMEOUT_SECS", lookup("AI_RELAY_TIMEOUT_SECS")) {
            self.timeout_secs = v;
        }
        if let Some(v) = parsed("AI_RELAY_MAX_ATTEMPTS", lookup("AI_RELAY_MAX_ATTEMPTS")) {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parsed("AI_RELAY_BACKOFF_MS", lookup("AI_RELAY_BACKOFF_MS")) {
            self.retry.backoff_ms = v;
        }
        if let Some(proxy) = lookup("AI_RELAY_PROXY_URL").filter(|s| !s.is_empty()) {
            self.proxy_url = Some(proxy);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, msg: String| {
            Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("config_validator"),
            )
        };

        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "base_url must be set".to_string()));
        }
        Url::parse(&self.base_url)
            .map_err(|e| invalid("base_url", format!("invalid base_url '{}': {}", self.base_url, e)))?;
        if let Some(proxy) = &self.proxy_url {
            Url::parse(proxy).map_err(|e| invalid("proxy_url", format!("invalid proxy_url: {}", e)))?;
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "max_attempts must be at least 1".to_string()));
        }
        for (field, spec) in [
            ("poll.safety_scan.max_attempts", &self.poll.safety_scan),
            ("poll.generation.max_attempts", &self.poll.generation),
        ] {
            if spec.max_attempts == 0 {
                return Err(invalid(field, "max_attempts must be at least 1".to_string()));
            }
        }
        if self.stream.queue_capacity == 0 {
            return Err(invalid("stream.queue_capacity", "queue_capacity must be at least 1".to_string()));
        }
        if !self.variants.iter().any(|v| v.kind == VariantKind::Chat) {
            return Err(invalid("variants", "at least one chat variant is required".to_string()));
        }
        Ok(())
    }

    /// Look up a variant by name; unknown names fall back to the first chat variant.
    pub fn resolve_variant(&self, name: &str) -> Result<&ModelVariant> {
        if let Some(v) = self.variants.iter().find(|v| v.name == name) {
            return Ok(v);
        }
        let fallback = self
            .variants
            .iter()
            .find(|v| v.kind == VariantKind::Chat)
            .ok_or_else(|| {
                Error::configuration_with_context(
                    "no chat variant configured",
                    ErrorContext::new().with_field_path("variants"),
                )
            })?;
        debug!(requested = name, resolved = fallback.name.as_str(), "unknown model variant");
        Ok(fallback)
    }

    /// Absolute URL of a vendor path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
