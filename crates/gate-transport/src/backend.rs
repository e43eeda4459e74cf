//! Backend request transport trait.

use async_trait::async_trait;
use bytes::Bytes;

/// Status and fully-read body of one backend response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Bytes,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Other(String),
}

/// One-shot request path to the authorization backend.
///
/// Implementations must not retry. A returned reply has already been read in
/// full, so no connection handle outlives the call.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// POST a JSON body to `path`.
    async fn post_json(&self, path: &str, body: Bytes) -> Result<HttpReply, TransportError>;

    /// GET `path`.
    async fn get(&self, path: &str) -> Result<HttpReply, TransportError>;
}
