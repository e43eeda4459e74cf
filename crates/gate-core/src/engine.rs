//! Access verification engine.
//!
//! `Idle -> Verifying -> {Allowed | Denied | Faulted} -> Idle`
//!
//! Credential deliveries arrive on an [`EngineHandle`] from whatever task the
//! transport callback runs on. The handle performs the `Idle -> Verifying`
//! check-and-set atomically, so at most one credential is ever in flight and
//! anything delivered meanwhile is dropped. The engine loop then owns the
//! cycle until it is back in `Idle`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::client::{HealthStatus, VerificationClient};
use crate::credential::{Credential, CredentialSource};
use crate::errors::EngineError;
use crate::identity::GateIdentity;
use crate::indicator::{IndicatorSink, Screen, Signal};
use crate::radio::{RadioLifecycleManager, RadioUnavailable};
use crate::result::{ErrorKind, VerificationResult};

/// Shown when a denial carries no usable text.
pub const FALLBACK_DENY_REASON: &str = "Bad token";
/// Shown when the backend denies without giving a reason.
pub const BACKEND_DENY_REASON: &str = "Backend DENY";

/// What the indicator currently shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Verifying,
    Allowed,
    Denied { reason: String },
    Faulted { kind: ErrorKind, detail: String },
}

impl EngineState {
    fn screen(&self, gate_id: &str) -> Screen {
        match self {
            EngineState::Idle => Screen::Ready,
            EngineState::Verifying => Screen::Verifying,
            EngineState::Allowed => Screen::Allowed {
                gate_id: gate_id.to_string(),
            },
            EngineState::Denied { reason } => {
                let text = if reason.trim().is_empty() {
                    BACKEND_DENY_REASON.to_string()
                } else {
                    reason.clone()
                };
                Screen::Denied { reason: text }
            }
            EngineState::Faulted { kind, .. } => {
                let text = kind.display_reason();
                Screen::Denied {
                    reason: if text.trim().is_empty() {
                        FALLBACK_DENY_REASON.to_string()
                    } else {
                        text
                    },
                }
            }
        }
    }

    fn signal(&self) -> Option<Signal> {
        match self {
            EngineState::Idle => Some(Signal::Clear),
            EngineState::Verifying => None,
            EngineState::Allowed => Some(Signal::Allow),
            EngineState::Denied { .. } | EngineState::Faulted { .. } => Some(Signal::Deny),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long the allow indicator is held.
    pub allow_dwell: Duration,
    /// How long the deny indicator is held.
    pub deny_dwell: Duration,
    /// Probe the backend's liveness path before each verification.
    pub preflight_health: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_dwell: Duration::from_millis(1200),
            deny_dwell: Duration::from_millis(1000),
            preflight_health: false,
        }
    }
}

/// Outcome of handing a raw credential to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A verification cycle has started for this credential.
    Accepted,
    /// Empty after trimming; nothing happened.
    IgnoredEmpty,
    /// Another cycle is in progress; the credential was discarded.
    DroppedBusy,
}

/// State cell plus the indicator it drives. The only place state changes.
///
/// `render` is held across every state change and the frame it produces, so
/// the sink never sees two writers and frames land in state order.
struct Transitions {
    state: watch::Sender<EngineState>,
    render: Mutex<()>,
    sink: Arc<dyn IndicatorSink>,
    gate_id: String,
}

impl Transitions {
    fn new(sink: Arc<dyn IndicatorSink>, gate_id: String) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            state,
            render: Mutex::new(()),
            sink,
            gate_id,
        }
    }

    fn show(&self, state: &EngineState) {
        let (line1, line2) = state.screen(&self.gate_id).lines();
        self.sink.render(&line1, &line2);
        if let Some(signal) = state.signal() {
            self.sink.signal(signal);
        }
    }

    fn transition(&self, next: EngineState) {
        let _render = self.render.lock();
        let prev = self.state.send_replace(next.clone());
        debug!(from = ?prev, to = ?next, "engine transition");
        self.show(&next);
    }

    /// Atomic `Idle -> Verifying`. Returns false if not idle.
    fn try_begin(&self) -> bool {
        let _render = self.render.lock();
        let began = self.state.send_if_modified(|state| {
            if *state == EngineState::Idle {
                *state = EngineState::Verifying;
                true
            } else {
                false
            }
        });
        if began {
            debug!(from = ?EngineState::Idle, to = ?EngineState::Verifying, "engine transition");
            self.show(&EngineState::Verifying);
        }
        began
    }

    fn show_current(&self) {
        let _render = self.render.lock();
        let current = self.current();
        self.show(&current);
    }

    fn current(&self) -> EngineState {
        self.state.borrow().clone()
    }
}

/// Cloneable delivery point for credential sources.
#[derive(Clone)]
pub struct EngineHandle {
    transitions: Arc<Transitions>,
    tx: mpsc::Sender<Credential>,
}

impl EngineHandle {
    /// Deliver a raw credential, as received from a transport callback.
    pub fn deliver(&self, raw: &[u8], source: CredentialSource) -> Result<Delivery, EngineError> {
        let Some(credential) = Credential::from_raw(raw, source) else {
            trace!(%source, "ignoring empty credential");
            return Ok(Delivery::IgnoredEmpty);
        };
        self.deliver_credential(credential)
    }

    pub fn deliver_credential(&self, credential: Credential) -> Result<Delivery, EngineError> {
        if self.tx.is_closed() {
            return Err(EngineError::Stopped);
        }
        if !self.transitions.try_begin() {
            debug!(source = %credential.source(), token = %credential.preview(), "engine busy, dropping credential");
            return Ok(Delivery::DroppedBusy);
        }

        info!(source = %credential.source(), token = %credential.preview(), "credential accepted");
        match self.tx.try_send(credential) {
            Ok(()) => Ok(Delivery::Accepted),
            Err(e) => {
                // Only one credential is ever in flight, so the slot is free
                // unless the loop has gone away.
                warn!(error = %e, "engine loop not accepting credentials");
                self.transitions.transition(EngineState::Idle);
                Err(EngineError::Stopped)
            }
        }
    }

    pub fn state(&self) -> EngineState {
        self.transitions.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.transitions.state.subscribe()
    }
}

pub struct AccessEngine {
    transitions: Arc<Transitions>,
    tx: Option<mpsc::Sender<Credential>>,
    rx: mpsc::Receiver<Credential>,
    identity: Arc<GateIdentity>,
    radio: Arc<RadioLifecycleManager>,
    client: VerificationClient,
    config: EngineConfig,
}

impl AccessEngine {
    pub fn new(
        identity: Arc<GateIdentity>,
        radio: Arc<RadioLifecycleManager>,
        client: VerificationClient,
        sink: Arc<dyn IndicatorSink>,
        config: EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            transitions: Arc::new(Transitions::new(sink, identity.gate_id().to_string())),
            tx: Some(tx),
            rx,
            identity,
            radio,
            client,
            config,
        }
    }

    /// Handle for credential sources. Must be taken before [`Self::run`].
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            transitions: Arc::clone(&self.transitions),
            tx: self
                .tx
                .clone()
                .unwrap_or_else(|| mpsc::channel(1).0),
        }
    }

    pub fn state(&self) -> EngineState {
        self.transitions.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.transitions.state.subscribe()
    }

    /// Show the idle screen.
    pub fn show_ready(&self) {
        self.transitions.show_current();
    }

    /// Process credentials until every handle has been dropped.
    pub async fn run(mut self) {
        self.tx = None;
        self.show_ready();
        info!(gate_id = self.identity.gate_id(), "access engine running");
        while self.process_next().await.is_some() {}
        info!("access engine stopped");
    }

    /// Wait for the next accepted credential and run its cycle to completion.
    ///
    /// Returns `None` once no handle can deliver any more.
    pub async fn process_next(&mut self) -> Option<VerificationResult> {
        let credential = self.rx.recv().await?;
        Some(self.run_cycle(credential).await)
    }

    async fn run_cycle(&self, credential: Credential) -> VerificationResult {
        let result = match self.radio.with_radio(|| self.verify(&credential)).await {
            Ok(result) => result,
            Err(RadioUnavailable) => {
                VerificationResult::error(ErrorKind::NetworkUnavailable, RadioUnavailable.to_string())
            }
        };

        let (next, dwell) = match &result {
            VerificationResult::Allow => (EngineState::Allowed, self.config.allow_dwell),
            VerificationResult::Deny(reason) => (
                EngineState::Denied {
                    reason: reason.clone(),
                },
                self.config.deny_dwell,
            ),
            VerificationResult::Error { kind, detail } => {
                warn!(kind = %kind, detail = %detail, "verification failed");
                (
                    EngineState::Faulted {
                        kind: *kind,
                        detail: detail.clone(),
                    },
                    self.config.deny_dwell,
                )
            }
        };

        info!(
            gate_id = self.identity.gate_id(),
            source = %credential.source(),
            outcome = result.outcome(),
            "access decision"
        );
        self.transitions.transition(next);
        sleep(dwell).await;
        self.transitions.transition(EngineState::Idle);
        result
    }

    async fn verify(&self, credential: &Credential) -> VerificationResult {
        if self.config.preflight_health {
            if let HealthStatus::Unhealthy(why) = self.client.health(&self.identity).await {
                return VerificationResult::error(
                    ErrorKind::NetworkUnavailable,
                    format!("health check failed: {}", why),
                );
            }
        }
        self.client.verify(&self.identity, credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::GateHarness;
    use crate::identity::BackendEndpoint;
    use crate::indicator::Signal;
    use crate::radio::RadioConfig;
    use gate_transport::{FakeRadio, NetworkCredentials, ScriptedBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Slow sink that counts calls made while another call is still inside.
    #[derive(Default)]
    struct OverlapSink {
        inside: AtomicUsize,
        overlaps: AtomicUsize,
        renders: AtomicUsize,
    }

    impl OverlapSink {
        fn enter(&self) {
            if self.inside.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn exit(&self) {
            self.inside.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl IndicatorSink for OverlapSink {
        fn render(&self, _line1: &str, _line2: &str) {
            self.enter();
            self.renders.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.exit();
        }

        fn signal(&self, _signal: Signal) {
            self.enter();
            std::thread::sleep(Duration::from_millis(1));
            self.exit();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_delivery_changes_nothing() {
        let h = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let handle = h.engine.handle();

        let empties: [&[u8]; 4] = [b"", b"   ", b"\r\n", b"\t"];
        for raw in empties {
            assert_eq!(handle.deliver(raw, CredentialSource::ShortRange), Ok(Delivery::IgnoredEmpty));
        }
        assert_eq!(handle.state(), EngineState::Idle);
        assert!(h.sink.frames().is_empty());
        assert_eq!(h.probe.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_while_busy_is_dropped() {
        let h = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let handle = h.engine.handle();

        assert_eq!(handle.deliver(b"ABCD1234", CredentialSource::ShortRange), Ok(Delivery::Accepted));
        assert_eq!(handle.state(), EngineState::Verifying);
        assert_eq!(handle.deliver(b"EFGH5678", CredentialSource::ShortRange), Ok(Delivery::DroppedBusy));
        assert_eq!(handle.deliver(b"04a10f7c", CredentialSource::ProximityTag), Ok(Delivery::DroppedBusy));

        // Only the verifying screen was shown for the accepted credential.
        assert_eq!(h.sink.renders(), vec![("VERIFY".to_string(), "Sending...".to_string())]);
    }

    #[test]
    fn concurrent_deliveries_admit_exactly_one() {
        const CALLERS: usize = 16;
        let h = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let callers: Vec<_> = (0..CALLERS)
            .map(|i| {
                let handle = h.engine.handle();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    handle.deliver(format!("TOKEN{i:04}").as_bytes(), CredentialSource::ShortRange)
                })
            })
            .collect();

        let outcomes: Vec<_> = callers.into_iter().map(|t| t.join().unwrap()).collect();
        let accepted = outcomes.iter().filter(|d| **d == Ok(Delivery::Accepted)).count();
        let dropped = outcomes.iter().filter(|d| **d == Ok(Delivery::DroppedBusy)).count();
        assert_eq!(accepted, 1);
        assert_eq!(dropped, CALLERS - 1);
        assert_eq!(h.engine.state(), EngineState::Verifying);
        assert_eq!(h.sink.renders(), vec![("VERIFY".to_string(), "Sending...".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sink_is_never_written_concurrently() {
        const CYCLES: usize = 10;
        let sink = Arc::new(OverlapSink::default());
        let radio = Arc::new(RadioLifecycleManager::new(
            FakeRadio::connecting(),
            NetworkCredentials::new("gate-net", "pass"),
            RadioConfig {
                poll_interval: Duration::from_millis(1),
                ..RadioConfig::default()
            },
        ));
        let backend = Arc::new(ScriptedBackend::deciding("ALLOW"));
        let identity = Arc::new(GateIdentity::new("GATE-01", BackendEndpoint::default()));
        let engine = AccessEngine::new(
            identity,
            radio,
            VerificationClient::new(backend),
            sink.clone(),
            EngineConfig {
                allow_dwell: Duration::from_millis(5),
                deny_dwell: Duration::from_millis(5),
                preflight_health: false,
            },
        );
        let handle = engine.handle();
        let running = tokio::spawn(engine.run());

        // Deliver again the moment the engine returns to idle, from a thread
        // outside the runtime.
        let feeder = std::thread::spawn(move || {
            let mut accepted = 0;
            while accepted < CYCLES {
                match handle.deliver(b"ABCD1234", CredentialSource::ShortRange) {
                    Ok(Delivery::Accepted) => accepted += 1,
                    Ok(_) => std::thread::yield_now(),
                    Err(e) => panic!("engine stopped early: {e}"),
                }
            }
        });
        tokio::task::spawn_blocking(move || feeder.join())
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), running)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sink.overlaps.load(Ordering::SeqCst), 0);
        // Initial READY plus VERIFY, ALLOW and READY per cycle.
        assert_eq!(sink.renders.load(Ordering::SeqCst), 1 + 3 * CYCLES);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_walks_states_and_returns_idle() {
        let mut h = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let handle = h.engine.handle();
        let mut rx = h.engine.subscribe();

        handle.deliver(b"ABCD1234", CredentialSource::ShortRange).unwrap();
        let first = rx.borrow_and_update().clone();
        let observer = tokio::spawn(async move {
            let mut seen = vec![first];
            while rx.changed().await.is_ok() {
                let s = rx.borrow_and_update().clone();
                let done = s == EngineState::Idle;
                seen.push(s);
                if done {
                    break;
                }
            }
            seen
        });

        let result = h.engine.process_next().await;
        assert_eq!(result, Some(VerificationResult::Allow));
        let seen = observer.await.unwrap();
        assert_eq!(seen, vec![EngineState::Verifying, EngineState::Allowed, EngineState::Idle]);
        assert_eq!(h.sink.signals(), vec![Signal::Allow, Signal::Clear]);
    }

    #[tokio::test(start_paused = true)]
    async fn radio_released_on_deny_and_error() {
        let backend = ScriptedBackend::deciding("DENY");
        backend.push_reply(Ok(gate_transport::HttpReply::new(502, "bad gateway")));
        let mut h = GateHarness::new(FakeRadio::connecting(), backend);
        let handle = h.engine.handle();

        handle.deliver(b"ABCD1234", CredentialSource::ShortRange).unwrap();
        let first = h.engine.process_next().await.unwrap();
        assert!(matches!(first, VerificationResult::Error { kind: ErrorKind::HttpStatus(502), .. }));
        assert_eq!(h.probe.power_offs(), 1);

        h.probe.clear();
        h.sink.clear();
        handle.deliver(b"ABCD1234", CredentialSource::ShortRange).unwrap();
        let second = h.engine.process_next().await.unwrap();
        assert_eq!(second, VerificationResult::Deny(String::new()));
        assert_eq!(h.probe.connect_attempts(), 1);
        assert_eq!(h.probe.power_offs(), 1);
        assert_eq!(h.radio.stats().releases, 2);
        assert_eq!(
            h.sink.renders(),
            vec![
                ("VERIFY".to_string(), "Sending...".to_string()),
                ("DENY".to_string(), "Backend DENY".to_string()),
                ("READY".to_string(), "Write token".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn preflight_failure_skips_verification() {
        let backend = ScriptedBackend::deciding("ALLOW")
            .with_health(Err(gate_transport::TransportError::Unreachable("refused".into())));
        let mut h = GateHarness::with_config(
            FakeRadio::connecting(),
            backend,
            EngineConfig {
                preflight_health: true,
                ..EngineConfig::default()
            },
        );
        let handle = h.engine.handle();

        handle.deliver(b"ABCD1234", CredentialSource::ShortRange).unwrap();
        let result = h.engine.process_next().await.unwrap();

        assert!(matches!(
            result,
            VerificationResult::Error { kind: ErrorKind::NetworkUnavailable, .. }
        ));
        assert_eq!(h.backend.post_count(), 0);
        assert_eq!(h.probe.power_offs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_engine_rejects_and_stays_idle() {
        let h = GateHarness::new(FakeRadio::connecting(), ScriptedBackend::deciding("ALLOW"));
        let handle = h.engine.handle();
        drop(h.engine);

        assert_eq!(handle.deliver(b"ABCD1234", CredentialSource::ShortRange), Err(EngineError::Stopped));
        assert_eq!(handle.state(), EngineState::Idle);
    }

    #[test]
    fn screens_for_outcomes() {
        let denied = EngineState::Denied { reason: String::new() };
        assert_eq!(denied.screen("G").lines().1, BACKEND_DENY_REASON);

        let with_reason = EngineState::Denied { reason: "NO_PERMISSION".into() };
        assert_eq!(with_reason.screen("G").lines().1, "NO_PERMISSION");

        let faulted = EngineState::Faulted {
            kind: ErrorKind::NetworkUnavailable,
            detail: String::new(),
        };
        assert_eq!(faulted.screen("G").lines(), ("DENY".to_string(), "Wi-Fi fail".to_string()));
    }
}
