use crate::config::{AuthConfig, RelayConfig};
use crate::transport::{
    FileUpload, RemoteFileInfo, TransportError, VendorSession, VendorTransport,
};
use crate::{BoxStream, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, trace};

const ERROR_BODY_LIMIT: usize = 512;

/// reqwest-backed [`VendorTransport`].
///
/// Service calls share one pooled client; every conversation session gets a dedicated
/// client without idle pooling so closing the session really releases its connection.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
    timeout: Duration,
    proxy_url: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let timeout = config.timeout();
        let proxy_url = config.proxy_url.clone();

        let pool_max_idle = env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(32);
        let client = build_client(timeout, proxy_url.as_deref(), pool_max_idle)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
            timeout,
            proxy_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn build_client(
    timeout: Duration,
    proxy_url: Option<&str>,
    pool_max_idle_per_host: usize,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(Some(Duration::from_secs(
            env::var("AI_HTTP_POOL_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(90),
        )))
        .http2_adaptive_window(true)
        .http2_keep_alive_interval(Some(Duration::from_secs(30)))
        .http2_keep_alive_timeout(Duration::from_secs(10));

    if let Some(proxy_url) = proxy_url {
        let proxy = Proxy::all(proxy_url).map_err(TransportError::Http)?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))
}

/// Turn a non-2xx response into [`TransportError::Status`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(Error::Transport(TransportError::Status {
        status: status.as_u16(),
        body,
    }))
}

fn header_str(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl VendorTransport for HttpTransport {
    async fn open_session(&self, credential: &str) -> Result<Box<dyn VendorSession>> {
        let client = build_client(self.timeout, self.proxy_url.as_deref(), 0)?;
        debug!(base_url = self.base_url.as_str(), "opened vendor session");
        Ok(Box::new(HttpSession {
            client: Some(client),
            base_url: self.base_url.clone(),
            auth_header: self.auth.header.clone(),
            auth_value: self.auth.header_value(credential),
        }))
    }

    async fn post_json(&self, credential: &str, path: &str, body: &Value) -> Result<Value> {
        trace!(path, "vendor service call");
        let resp = self
            .client
            .post(self.url(path))
            .header(self.auth.header.as_str(), self.auth.header_value(credential))
            .json(body)
            .send()
            .await
            .map_err(TransportError::Http)?;
        let resp = check_status(resp).await?;
        let json = resp.json().await.map_err(TransportError::Http)?;
        Ok(json)
    }

    async fn upload(&self, credential: &str, path: &str, file: FileUpload) -> Result<Value> {
        let size = file.bytes.len();
        let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(TransportError::Http)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(name = file.name.as_str(), size, "uploading file");
        let resp = self
            .client
            .post(self.url(path))
            .header(self.auth.header.as_str(), self.auth.header_value(credential))
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::Http)?;
        let resp = check_status(resp).await?;
        let json = resp.json().await.map_err(TransportError::Http)?;
        Ok(json)
    }

    async fn probe(&self, url: &str) -> Result<RemoteFileInfo> {
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(TransportError::Http)?;
        let resp = check_status(resp).await?;
        // HEAD bodies are empty, so read the header rather than the body size hint.
        Ok(RemoteFileInfo {
            content_length: header_str(&resp, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_type: header_str(&resp, CONTENT_TYPE),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(TransportError::Http)?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await.map_err(TransportError::Http)?;
        Ok(bytes)
    }
}

/// One dedicated vendor connection.
pub struct HttpSession {
    client: Option<reqwest::Client>,
    base_url: String,
    auth_header: String,
    auth_value: String,
}

#[async_trait]
impl VendorSession for HttpSession {
    async fn send(&mut self, path: &str, payload: &Value) -> Result<BoxStream<'static, Bytes>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| TransportError::Other("session already closed".to_string()))?;

        let resp = client
            .post(format!("{}{}", self.base_url, path))
            .header(self.auth_header.as_str(), self.auth_value.as_str())
            .header(ACCEPT, "text/event-stream")
            .json(payload)
            .send()
            .await
            .map_err(TransportError::Http)?;
        let resp = check_status(resp).await?;

        let byte_stream = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));
        Ok(Box::pin(byte_stream))
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            trace!("dropping dedicated session client");
        }
    }
}
