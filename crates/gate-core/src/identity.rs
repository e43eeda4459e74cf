//! Static gate identity and backend endpoint.

/// Where the authorization backend lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
    pub verify_path: String,
    pub health_path: String,
}

impl Default for BackendEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            verify_path: "/api/v1/access/verify".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

/// Identity of this gate. Fixed for the process lifetime; share it via `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateIdentity {
    gate_id: String,
    controller_id: String,
    firmware: String,
    endpoint: BackendEndpoint,
}

impl GateIdentity {
    pub fn new(gate_id: impl Into<String>, endpoint: BackendEndpoint) -> Self {
        let gate_id = gate_id.into();
        Self {
            controller_id: gate_id.clone(),
            gate_id,
            firmware: env!("CARGO_PKG_VERSION").to_string(),
            endpoint,
        }
    }

    /// Controller identifier reported in proximity-tag envelopes.
    pub fn with_controller_id(mut self, controller_id: impl Into<String>) -> Self {
        self.controller_id = controller_id.into();
        self
    }

    pub fn gate_id(&self) -> &str {
        &self.gate_id
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    pub fn firmware(&self) -> &str {
        &self.firmware
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }
}
