//! Radio driver for a node running on a host network stack.
//!
//! Association is modelled as TCP reachability of the backend: a
//! connect attempt succeeds once the backend port accepts a connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gate_transport::{LinkStatus, NetworkCredentials, PowerSaveMode, RadioDriver, RadioError};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Link {
    status: Option<LinkStatus>,
    stream: Option<TcpStream>,
}

pub struct HostLinkRadio {
    host: String,
    port: u16,
    probe_timeout: Duration,
    power_save: PowerSaveMode,
    powered: bool,
    link: Arc<Mutex<Link>>,
    attempt: Option<JoinHandle<()>>,
}

impl HostLinkRadio {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            power_save: PowerSaveMode::None,
            powered: false,
            link: Arc::new(Mutex::new(Link::default())),
            attempt: None,
        }
    }

    /// Give up on a single reachability probe after `timeout`.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn power_save(&self) -> PowerSaveMode {
        self.power_save
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn drop_link(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        *self.link.lock() = Link::default();
    }
}

#[async_trait]
impl RadioDriver for HostLinkRadio {
    async fn set_power_save(&mut self, mode: PowerSaveMode) -> Result<(), RadioError> {
        debug!(?mode, "power save");
        self.power_save = mode;
        Ok(())
    }

    async fn begin_connect(&mut self, credentials: &NetworkCredentials) -> Result<(), RadioError> {
        self.drop_link();
        self.powered = true;
        info!(ssid = %credentials.ssid, host = %self.host, port = self.port, "connecting");

        self.link.lock().status = Some(LinkStatus::Connecting);
        let link = self.link.clone();
        let addr = (self.host.clone(), self.port);
        let probe_timeout = self.probe_timeout;
        self.attempt = Some(tokio::spawn(async move {
            let outcome = tokio::time::timeout(probe_timeout, TcpStream::connect(addr)).await;
            let mut link = link.lock();
            match outcome {
                Ok(Ok(stream)) => {
                    link.stream = Some(stream);
                    link.status = Some(LinkStatus::Connected);
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "link probe failed");
                    link.status = Some(LinkStatus::Failed);
                }
                Err(_) => {
                    debug!("link probe timed out");
                    link.status = Some(LinkStatus::Failed);
                }
            }
        }));
        Ok(())
    }

    async fn link_status(&mut self) -> LinkStatus {
        if !self.powered {
            return LinkStatus::Idle;
        }
        self.link.lock().status.unwrap_or(LinkStatus::Idle)
    }

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        self.drop_link();
        Ok(())
    }

    async fn power_off(&mut self) -> Result<(), RadioError> {
        self.drop_link();
        if self.powered {
            info!("radio powered off");
        }
        self.powered = false;
        Ok(())
    }
}

impl Drop for HostLinkRadio {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }
}
