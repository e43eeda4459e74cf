//! Test harness for the access engine.
//!
//! Assembles an engine over a [`FakeRadio`], a [`ScriptedBackend`] and a
//! [`RecordingSink`] so flows can be driven without hardware.

use std::sync::Arc;

use gate_transport::{FakeRadio, NetworkCredentials, RadioProbe, ScriptedBackend};

use crate::client::VerificationClient;
use crate::engine::{AccessEngine, EngineConfig};
use crate::identity::{BackendEndpoint, GateIdentity};
use crate::indicator::RecordingSink;
use crate::radio::{RadioConfig, RadioLifecycleManager};

/// Gate identifier used by harness engines.
pub const HARNESS_GATE_ID: &str = "GATE-01";

pub struct GateHarness {
    pub engine: AccessEngine,
    pub probe: RadioProbe,
    pub radio: Arc<RadioLifecycleManager>,
    pub backend: Arc<ScriptedBackend>,
    pub sink: Arc<RecordingSink>,
}

impl GateHarness {
    pub fn new(radio: FakeRadio, backend: ScriptedBackend) -> Self {
        Self::with_config(radio, backend, EngineConfig::default())
    }

    pub fn with_config(radio: FakeRadio, backend: ScriptedBackend, config: EngineConfig) -> Self {
        Self::build(radio, backend, RadioConfig::default(), config)
    }

    pub fn build(
        radio: FakeRadio,
        backend: ScriptedBackend,
        radio_config: RadioConfig,
        config: EngineConfig,
    ) -> Self {
        let probe = radio.probe();
        let radio = Arc::new(RadioLifecycleManager::new(
            radio,
            NetworkCredentials::new("harness-net", "harness-pass"),
            radio_config,
        ));
        let backend = Arc::new(backend);
        let sink = Arc::new(RecordingSink::new());
        let identity = Arc::new(GateIdentity::new(HARNESS_GATE_ID, BackendEndpoint::default()));
        let client = VerificationClient::new(backend.clone());

        let engine = AccessEngine::new(identity, radio.clone(), client, sink.clone(), config);
        Self {
            engine,
            probe,
            radio,
            backend,
            sink,
        }
    }
}
