//! Verification client: one backend call per cycle.

use std::sync::Arc;
use std::time::Duration;

use gate_transport::{BackendTransport, TransportError};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::identity::GateIdentity;
use crate::request::{EnvelopeKind, VerificationRequest};
use crate::result::{classify_reply, ErrorKind, VerificationResult};

/// Liveness of the backend as seen from the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Clone)]
pub struct VerificationClient {
    transport: Arc<dyn BackendTransport>,
    timeout: Duration,
    envelope: EnvelopeKind,
}

impl VerificationClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7000);

    pub fn new(transport: Arc<dyn BackendTransport>) -> Self {
        Self {
            transport,
            timeout: Self::DEFAULT_TIMEOUT,
            envelope: EnvelopeKind::Gate,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_envelope(mut self, envelope: EnvelopeKind) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the backend whether `credential` opens this gate.
    ///
    /// Never retries. The request future is dropped when the deadline hits,
    /// which closes its connection.
    pub async fn verify(&self, identity: &GateIdentity, credential: &Credential) -> VerificationResult {
        let request = VerificationRequest::new(identity, credential, self.envelope);
        let body = match request.to_body() {
            Ok(body) => body,
            Err(e) => return VerificationResult::error(ErrorKind::MalformedResponse, e.to_string()),
        };

        debug!(
            gate_id = identity.gate_id(),
            token = %credential.preview(),
            path = request.path(),
            "sending verification"
        );

        let result = match timeout(self.timeout, self.transport.post_json(request.path(), body)).await {
            Err(_) => VerificationResult::error(
                ErrorKind::Timeout,
                format!("no answer within {} ms", self.timeout.as_millis()),
            ),
            Ok(Err(e)) => map_transport_error(e),
            Ok(Ok(reply)) => {
                debug!(status = reply.status, body = %reply.body_text(), "verification reply");
                classify_reply(reply.status, &reply.body)
            }
        };

        info!(
            gate_id = identity.gate_id(),
            token = %credential.preview(),
            outcome = result.outcome(),
            "verification complete"
        );
        result
    }

    /// Probe the backend's liveness path.
    pub async fn health(&self, identity: &GateIdentity) -> HealthStatus {
        let path = &identity.endpoint().health_path;
        let status = match timeout(self.timeout, self.transport.get(path)).await {
            Err(_) => HealthStatus::Unhealthy("timeout".to_string()),
            Ok(Err(e)) => HealthStatus::Unhealthy(e.to_string()),
            Ok(Ok(reply)) if reply.status == 200 && reply.body_text().contains("\"ok\"") => {
                HealthStatus::Healthy
            }
            Ok(Ok(reply)) => HealthStatus::Unhealthy(format!(
                "status={} body={}",
                reply.status,
                reply.body_text()
            )),
        };
        match &status {
            HealthStatus::Healthy => debug!(path = %path, "backend healthy"),
            HealthStatus::Unhealthy(why) => warn!(path = %path, reason = %why, "backend health check failed"),
        }
        status
    }
}

fn map_transport_error(e: TransportError) -> VerificationResult {
    match e {
        TransportError::Timeout => VerificationResult::error(ErrorKind::Timeout, e.to_string()),
        TransportError::Unreachable(_) | TransportError::Other(_) => {
            VerificationResult::error(ErrorKind::NetworkUnavailable, e.to_string())
        }
    }
}
