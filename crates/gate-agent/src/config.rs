use std::path::{Path, PathBuf};
use std::time::Duration;

use gate_core::client::VerificationClient;
use gate_core::engine::EngineConfig;
use gate_core::identity::{BackendEndpoint, GateIdentity};
use gate_core::radio::{RadioConfig, RadioPolicy};
use gate_core::request::EnvelopeKind;
use gate_transport::{BackoffPolicy, HttpClientConfig, NetworkCredentials};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub gate_id: String,
    /// Reported as `controller_info.id` in proximity-tag envelopes.
    pub controller_id: Option<String>,
    pub envelope: EnvelopeKind,
    /// Probe the liveness path before each verification.
    pub preflight_health: bool,

    pub backend: BackendConfig,
    pub network: NetworkConfig,
    pub radio: RadioSection,
    pub dwell: DwellConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub verify_path: String,
    pub health_path: String,
    pub http_timeout_ms: u64,
}

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct NetworkConfig {
    #[serde(default = "default_network_ssid")]
    pub ssid: String,
    #[serde(default = "default_network_passphrase")]
    pub passphrase: String,
}

fn default_network_ssid() -> String {
    NetworkConfig::default().ssid.clone()
}

fn default_network_passphrase() -> String {
    NetworkConfig::default().passphrase.clone()
}

impl std::fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSection {
    pub max_attempts: u32,
    pub connect_window_ms: u64,
    pub poll_interval_ms: u64,
    pub backoff_base_ms: u64,
    /// Diagnostic mode: leave the radio associated between cycles.
    pub keep_alive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    pub allow_ms: u64,
    pub deny_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gate_id: "GATE-01".to_string(),
            controller_id: None,
            envelope: EnvelopeKind::Gate,
            preflight_health: false,
            backend: BackendConfig::default(),
            network: NetworkConfig::default(),
            radio: RadioSection::default(),
            dwell: DwellConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        let endpoint = BackendEndpoint::default();
        Self {
            host: endpoint.host,
            port: endpoint.port,
            verify_path: endpoint.verify_path,
            health_path: endpoint.health_path,
            http_timeout_ms: 7000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "gate-net".to_string(),
            passphrase: String::new(),
        }
    }
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            connect_window_ms: 12_000,
            poll_interval_ms: 250,
            backoff_base_ms: 1000,
            keep_alive: false,
        }
    }
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            allow_ms: 1200,
            deny_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AgentConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// File (if given) or defaults, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GATE_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(id) = lookup("GATE_ID") {
            self.gate_id = id;
        }
        if let Some(host) = lookup("GATE_BACKEND_HOST") {
            self.backend.host = host;
        }
        if let Some(port) = lookup("GATE_BACKEND_PORT") {
            self.backend.port = parse_env("GATE_BACKEND_PORT", &port)?;
        }
        if let Some(path) = lookup("GATE_VERIFY_PATH") {
            self.backend.verify_path = path;
        }
        if let Some(path) = lookup("GATE_HEALTH_PATH") {
            self.backend.health_path = path;
        }
        if let Some(ms) = lookup("GATE_HTTP_TIMEOUT_MS") {
            self.backend.http_timeout_ms = parse_env("GATE_HTTP_TIMEOUT_MS", &ms)?;
        }
        if let Some(ssid) = lookup("GATE_WIFI_SSID") {
            self.network.ssid = ssid;
        }
        if let Some(pass) = lookup("GATE_WIFI_PASS") {
            self.network.passphrase = pass;
        }
        if let Some(kind) = lookup("GATE_ENVELOPE") {
            self.envelope = match kind.as_str() {
                "gate" => EnvelopeKind::Gate,
                "proximity_tag" => EnvelopeKind::ProximityTag,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "GATE_ENVELOPE must be gate or proximity_tag, got {}",
                        other
                    )))
                }
            };
        }
        if let Some(flag) = lookup("GATE_KEEP_RADIO_UP") {
            self.radio.keep_alive = parse_env("GATE_KEEP_RADIO_UP", &flag)?;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gate_id.trim().is_empty() {
            return Err(ConfigError::ValidationError("gate_id must not be empty".to_string()));
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("backend.host must not be empty".to_string()));
        }
        if self.backend.port == 0 {
            return Err(ConfigError::ValidationError("backend.port must be non-zero".to_string()));
        }
        for (name, path) in [
            ("backend.verify_path", &self.backend.verify_path),
            ("backend.health_path", &self.backend.health_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!("{} must start with '/'", name)));
            }
        }
        if self.backend.http_timeout_ms == 0 || self.backend.http_timeout_ms > 30_000 {
            return Err(ConfigError::ValidationError(
                "backend.http_timeout_ms must be between 1 and 30000".to_string(),
            ));
        }
        if self.network.ssid.is_empty() {
            return Err(ConfigError::ValidationError("network.ssid must not be empty".to_string()));
        }
        if self.radio.max_attempts == 0 || self.radio.max_attempts > 10 {
            return Err(ConfigError::ValidationError(
                "radio.max_attempts must be between 1 and 10".to_string(),
            ));
        }
        if self.radio.poll_interval_ms == 0 || self.radio.poll_interval_ms > self.radio.connect_window_ms {
            return Err(ConfigError::ValidationError(
                "radio.poll_interval_ms must be non-zero and within connect_window_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn identity(&self) -> GateIdentity {
        let endpoint = BackendEndpoint {
            host: self.backend.host.clone(),
            port: self.backend.port,
            verify_path: self.backend.verify_path.clone(),
            health_path: self.backend.health_path.clone(),
        };
        let identity = GateIdentity::new(self.gate_id.clone(), endpoint);
        match &self.controller_id {
            Some(id) => identity.with_controller_id(id.clone()),
            None => identity,
        }
    }

    pub fn credentials(&self) -> NetworkCredentials {
        NetworkCredentials::new(self.network.ssid.clone(), self.network.passphrase.clone())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.http_timeout_ms)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: self.http_timeout(),
            ..HttpClientConfig::default()
        }
    }

    pub fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.radio.backoff_base_ms),
                self.radio.max_attempts,
            ),
            connect_window: Duration::from_millis(self.radio.connect_window_ms),
            poll_interval: Duration::from_millis(self.radio.poll_interval_ms),
            policy: if self.radio.keep_alive {
                RadioPolicy::KeepAlive
            } else {
                RadioPolicy::TearDownAfterUse
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            allow_dwell: Duration::from_millis(self.dwell.allow_ms),
            deny_dwell: Duration::from_millis(self.dwell.deny_ms),
            preflight_health: self.preflight_health,
        }
    }

    /// Client settings that do not depend on the transport.
    pub fn configure_client(&self, client: VerificationClient) -> VerificationClient {
        client.with_timeout(self.http_timeout()).with_envelope(self.envelope)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{}: {}", key, e)))
}
