use crate::pipeline::PipelineError;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.messages", "retry.max_attempts")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "request_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a file reference could not be turned into a reference descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceErrorKind {
    Oversize,
    Unreachable,
    UploadFailed,
    ScanFailed,
    ScanTimeout,
}

impl std::fmt::Display for ReferenceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReferenceErrorKind::Oversize => "oversize",
            ReferenceErrorKind::Unreachable => "unreachable source",
            ReferenceErrorKind::UploadFailed => "upload failure",
            ReferenceErrorKind::ScanFailed => "scan failure",
            ReferenceErrorKind::ScanTimeout => "scan timeout",
        };
        f.write_str(s)
    }
}

/// Unified error type for the relay runtime.
///
/// Only [`Error::Transport`] and [`Error::UpstreamProtocol`] are recoverable; the retry
/// envelope consults [`Error::is_retryable`] and every other kind ends the request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(#[from] PipelineError),

    #[error("Upstream business error{}: {message}", .code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    UpstreamBusiness {
        code: Option<String>,
        message: String,
    },

    #[error("File reference error ({kind}) for {reference}: {message}")]
    Reference {
        kind: ReferenceErrorKind,
        reference: String,
        message: String,
    },

    #[error("Polling job {job_id} timed out after {attempts} attempts")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("Polling job {job_id} failed: {reason}")]
    PollFailed { job_id: String, reason: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn business(code: Option<String>, message: impl Into<String>) -> Self {
        Error::UpstreamBusiness {
            code,
            message: message.into(),
        }
    }

    pub fn reference(
        kind: ReferenceErrorKind,
        reference: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Reference {
            kind,
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Whether the retry envelope may redo the transport exchange after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::UpstreamProtocol(_))
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}
