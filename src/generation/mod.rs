//! Asynchronous generation jobs (video variants).
//!
//! A job is submitted once, then polled with the generation constants until the
//! vendor reports an asset URL. The returned URL is normalized.

use crate::config::RelayConfig;
use crate::pipeline::normalize_url;
use crate::resilience::{Clock, PollResult, PollSpec, Poller};
use crate::transport::VendorTransport;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// A submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
    pub model: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReply {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobResult {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    reason: Option<String>,
}

impl StatusReply {
    fn classify(self) -> PollResult<Option<String>> {
        match self.status.as_str() {
            "complete" => PollResult::Succeeded(self.result.and_then(|r| r.url)),
            "failed" => PollResult::Failed(self.reason.unwrap_or_else(|| "generation failed".to_string())),
            _ => PollResult::Pending,
        }
    }
}

pub struct GenerationJobs {
    transport: Arc<dyn VendorTransport>,
    submit_path: String,
    status_path: String,
    poller: Poller,
}

impl GenerationJobs {
    pub fn new(transport: Arc<dyn VendorTransport>, config: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_spec(transport, config, config.poll.generation, clock)
    }

    pub fn with_spec(
        transport: Arc<dyn VendorTransport>,
        config: &RelayConfig,
        spec: PollSpec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            submit_path: config.endpoints.generation_submit.clone(),
            status_path: config.endpoints.generation_status.clone(),
            poller: Poller::new(spec, clock),
        }
    }

    pub async fn submit(&self, credential: &str, prompt: &str, model: &str) -> Result<TaskHandle> {
        let body = json!({ "prompt": prompt, "model": model });
        let reply = self
            .transport
            .post_json(credential, &self.submit_path, &body)
            .await?;
        let reply: SubmitReply = serde_json::from_value(reply)?;

        if let Some(code) = reply.error_code.filter(|c| !c.is_empty()) {
            return Err(Error::business(
                Some(code),
                reply.error_msg.unwrap_or_else(|| "generation job rejected".to_string()),
            ));
        }
        if reply.task_id.is_empty() {
            return Err(Error::business(None, "generation submit returned no task id"));
        }

        info!(task_id = reply.task_id.as_str(), model, "generation job submitted");
        Ok(TaskHandle {
            task_id: reply.task_id,
            model: model.to_string(),
            submitted_at: Utc::now(),
        })
    }

    /// Poll until the job finishes; returns the normalized asset URL.
    pub async fn wait(&self, credential: &str, handle: &TaskHandle) -> Result<String> {
        let body = json!({ "taskId": handle.task_id });
        let url = self
            .poller
            .poll(&handle.task_id, |_attempt| {
                let body = &body;
                async move {
                    let reply = self
                        .transport
                        .post_json(credential, &self.status_path, body)
                        .await?;
                    let reply: StatusReply = serde_json::from_value(reply)?;
                    Ok(reply.classify())
                }
            })
            .await?;

        let url = url.filter(|u| !u.is_empty()).ok_or_else(|| {
            Error::business(None, format!("generation job {} finished without an asset", handle.task_id))
        })?;
        let elapsed = Utc::now() - handle.submitted_at;
        info!(
            task_id = handle.task_id.as_str(),
            elapsed_secs = elapsed.num_seconds(),
            "generation job finished"
        );
        Ok(normalize_url(&url))
    }
}
