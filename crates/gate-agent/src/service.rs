//! Gate node service: wires the radio, backend client, indicators and
//! credential input around one access engine.

use std::future::Future;
use std::sync::Arc;

use gate_core::client::{HealthStatus, VerificationClient};
use gate_core::indicator::{FanoutSink, IndicatorSink};
use gate_core::radio::{RadioLifecycleManager, RadioUnavailable};
use gate_core::{AccessEngine, EngineHandle, GateIdentity};
use gate_transport::{BackendTransport, HttpBackend, RadioDriver};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::indicator::{ConsoleIndicator, LedSignal};
use crate::radio::HostLinkRadio;
use crate::source::{LineSource, SourceStats};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service initialization failed: {0}")]
    InitFailed(String),
    #[error("task failed: {0}")]
    TaskFailed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootProbe {
    Healthy,
    Unhealthy,
    RadioUnavailable,
}

/// How the service came to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shutdown {
    Requested,
    /// Input ended and the last accepted credential was processed.
    InputClosed(SourceStats),
}

pub struct GateService {
    identity: Arc<GateIdentity>,
    radio: Arc<RadioLifecycleManager>,
    client: VerificationClient,
    engine: AccessEngine,
}

impl GateService {
    /// Host-network service: TCP link probe, HTTP backend, log indicators.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ServiceError> {
        let backend = HttpBackend::for_host(
            &config.backend.host,
            config.backend.port,
            &config.http_client_config(),
        )
        .map_err(|e| ServiceError::InitFailed(e.to_string()))?;
        let driver = HostLinkRadio::new(config.backend.host.clone(), config.backend.port)
            .with_probe_timeout(config.radio_config().connect_window);
        let sink = FanoutSink::new()
            .with(Arc::new(ConsoleIndicator::new()))
            .with(Arc::new(LedSignal::new()));

        Ok(Self::with_parts(config, driver, Arc::new(backend), Arc::new(sink)))
    }

    pub fn with_parts(
        config: &AgentConfig,
        driver: impl RadioDriver + 'static,
        transport: Arc<dyn BackendTransport>,
        sink: Arc<dyn IndicatorSink>,
    ) -> Self {
        let identity = Arc::new(config.identity());
        let radio = Arc::new(RadioLifecycleManager::new(
            driver,
            config.credentials(),
            config.radio_config(),
        ));
        let client = config.configure_client(VerificationClient::new(transport));
        let engine = AccessEngine::new(
            identity.clone(),
            radio.clone(),
            client.clone(),
            sink,
            config.engine_config(),
        );

        Self {
            identity,
            radio,
            client,
            engine,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.engine.handle()
    }

    pub fn radio(&self) -> &Arc<RadioLifecycleManager> {
        &self.radio
    }

    /// Park the radio, then check the backend once. The result is only logged.
    pub async fn boot(&self) -> BootProbe {
        self.radio.park_at_boot().await;
        info!(
            gate_id = self.identity.gate_id(),
            controller_id = self.identity.controller_id(),
            firmware = self.identity.firmware(),
            "gate node booting"
        );

        match self
            .radio
            .with_radio(|| self.client.health(&self.identity))
            .await
        {
            Ok(HealthStatus::Healthy) => {
                info!("backend reachable");
                BootProbe::Healthy
            }
            Ok(HealthStatus::Unhealthy(reason)) => {
                warn!(reason = %reason, "backend unhealthy at boot");
                BootProbe::Unhealthy
            }
            Err(RadioUnavailable) => {
                warn!("network unavailable at boot");
                BootProbe::RadioUnavailable
            }
        }
    }

    /// Run until `shutdown` resolves or `input` is exhausted.
    pub async fn run<R>(
        self,
        input: R,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Shutdown, ServiceError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        self.boot().await;

        let Self { radio, engine, .. } = self;
        let source = LineSource::new(input, engine.handle());
        let mut engine_task = tokio::spawn(engine.run());
        let mut source_task = tokio::spawn(source.run());

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                Ok(Shutdown::Requested)
            }
            joined = &mut engine_task => match joined {
                Ok(()) => match (&mut source_task).await {
                    Ok(Ok(stats)) => Ok(Shutdown::InputClosed(stats)),
                    Ok(Err(e)) => Err(ServiceError::TaskFailed(format!("input: {}", e))),
                    Err(e) => Err(ServiceError::TaskFailed(e.to_string())),
                },
                Err(e) => Err(ServiceError::TaskFailed(e.to_string())),
            },
        };

        source_task.abort();
        engine_task.abort();
        radio.park().await;

        match &outcome {
            Ok(how) => info!(?how, "gate node stopped"),
            Err(e) => error!(error = %e, "gate node stopped"),
        }
        outcome
    }
}
