//! reqwest-backed backend transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::backend::{BackendTransport, HttpReply, TransportError};

/// HTTP client configuration
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(7000),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, config: &HttpClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Plain-HTTP backend at `host:port`.
    pub fn for_host(host: &str, port: u16, config: &HttpClientConfig) -> Result<Self, TransportError> {
        Self::new(format!("http://{}:{}", host, port), config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn finish(resp: reqwest::Response) -> Result<HttpReply, TransportError> {
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(HttpReply { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl BackendTransport for HttpBackend {
    async fn post_json(&self, path: &str, body: Bytes) -> Result<HttpReply, TransportError> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let reply = Self::finish(resp).await?;
        debug!(url = %url, status = reply.status, "POST complete");
        Ok(reply)
    }

    async fn get(&self, path: &str) -> Result<HttpReply, TransportError> {
        let url = self.url(path);
        let resp = self.client.get(&url).send().await.map_err(map_reqwest_error)?;
        let reply = Self::finish(resp).await?;
        debug!(url = %url, status = reply.status, "GET complete");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_with_single_slash() {
        let backend = HttpBackend::for_host("192.168.10.228", 8001, &HttpClientConfig::default()).unwrap();
        assert_eq!(backend.base_url(), "http://192.168.10.228:8001");
        assert_eq!(
            backend.url("/api/v1/access/verify"),
            "http://192.168.10.228:8001/api/v1/access/verify"
        );
        assert_eq!(backend.url("health"), "http://192.168.10.228:8001/health");
    }

    #[test]
    fn trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://gate.local/", &HttpClientConfig::default()).unwrap();
        assert_eq!(backend.url("/health"), "http://gate.local/health");
    }
}
