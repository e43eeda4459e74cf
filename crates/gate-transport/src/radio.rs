//! Long-range network radio driver trait.

use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Radio power-save setting.
///
/// `MinModem` keeps the modem sleeping between beacons so the short-range
/// transport keeps its advertising slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerSaveMode {
    None,
    MinModem,
    MaxModem,
}

/// Association status reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Network join credentials. The passphrase is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NetworkCredentials {
    pub ssid: String,
    passphrase: String,
}

impl NetworkCredentials {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio driver error: {0}")]
    Driver(String),

    #[error("operation not supported by radio: {0}")]
    Unsupported(String),
}

/// Driver for the long-range radio.
///
/// Implementations only perform the primitive operations. Retry, backoff and
/// ownership policy live in the lifecycle manager that owns the driver.
#[async_trait]
pub trait RadioDriver: Send {
    /// Apply a power-save mode. Must be honoured before and while connecting.
    async fn set_power_save(&mut self, mode: PowerSaveMode) -> Result<(), RadioError>;

    /// Start associating with the configured network. Returns once the
    /// attempt is under way; completion is observed through [`Self::link_status`].
    async fn begin_connect(&mut self, credentials: &NetworkCredentials) -> Result<(), RadioError>;

    /// Current association status.
    async fn link_status(&mut self) -> LinkStatus;

    /// Drop the association.
    async fn disconnect(&mut self) -> Result<(), RadioError>;

    /// Power the radio down entirely.
    async fn power_off(&mut self) -> Result<(), RadioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_passphrase() {
        let creds = NetworkCredentials::new("MOKA", "hunter22");
        let dbg = format!("{:?}", creds);
        assert!(dbg.contains("MOKA"));
        assert!(!dbg.contains("hunter22"));
        assert_eq!(creds.passphrase(), "hunter22");
    }
}
