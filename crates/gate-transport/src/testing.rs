//! Scriptable fakes for the radio and backend seams.

use crate::backend::{BackendTransport, HttpReply, TransportError};
use crate::radio::{LinkStatus, NetworkCredentials, PowerSaveMode, RadioDriver, RadioError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// How a [`FakeRadio`] responds to connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Report `Connected` after this many status polls of each attempt.
    AfterPolls(u32),
    /// Connect only on this attempt (1-based); earlier attempts never associate.
    OnAttempt(u32),
    /// Never associate.
    Never,
    /// `begin_connect` itself fails.
    BeginFails,
}

/// Driver call recorded by [`FakeRadio`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    PowerSave(PowerSaveMode),
    BeginConnect,
    Disconnect,
    PowerOff,
}

#[derive(Default)]
struct FakeRadioState {
    events: Vec<RadioEvent>,
    attempts: u32,
    polls: u32,
    connected: bool,
}

/// Inspection handle for a [`FakeRadio`] that has been moved into a manager.
#[derive(Clone, Default)]
pub struct RadioProbe {
    state: Arc<Mutex<FakeRadioState>>,
}

impl RadioProbe {
    pub fn events(&self) -> Vec<RadioEvent> {
        self.state.lock().events.clone()
    }

    fn count(&self, pred: impl Fn(&RadioEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    pub fn connect_attempts(&self) -> usize {
        self.count(|e| *e == RadioEvent::BeginConnect)
    }

    pub fn power_offs(&self) -> usize {
        self.count(|e| *e == RadioEvent::PowerOff)
    }

    pub fn disconnects(&self) -> usize {
        self.count(|e| *e == RadioEvent::Disconnect)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Simulate the access point dropping the association.
    pub fn drop_link(&self) {
        self.state.lock().connected = false;
    }

    pub fn clear(&self) {
        self.state.lock().events.clear();
    }
}

/// Fake radio driver
pub struct FakeRadio {
    behavior: ConnectBehavior,
    probe: RadioProbe,
}

impl FakeRadio {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            probe: RadioProbe::default(),
        }
    }

    /// Radio that associates on the first status poll.
    pub fn connecting() -> Self {
        Self::new(ConnectBehavior::AfterPolls(1))
    }

    pub fn never_connecting() -> Self {
        Self::new(ConnectBehavior::Never)
    }

    pub fn probe(&self) -> RadioProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl RadioDriver for FakeRadio {
    async fn set_power_save(&mut self, mode: PowerSaveMode) -> Result<(), RadioError> {
        self.probe.state.lock().events.push(RadioEvent::PowerSave(mode));
        Ok(())
    }

    async fn begin_connect(&mut self, _credentials: &NetworkCredentials) -> Result<(), RadioError> {
        let mut state = self.probe.state.lock();
        state.events.push(RadioEvent::BeginConnect);
        state.attempts += 1;
        state.polls = 0;
        if self.behavior == ConnectBehavior::BeginFails {
            return Err(RadioError::Driver("association refused".to_string()));
        }
        Ok(())
    }

    async fn link_status(&mut self) -> LinkStatus {
        let mut state = self.probe.state.lock();
        if state.connected {
            return LinkStatus::Connected;
        }
        if state.attempts == 0 {
            return LinkStatus::Idle;
        }
        state.polls += 1;
        let connects = match self.behavior {
            ConnectBehavior::AfterPolls(n) => state.polls >= n,
            ConnectBehavior::OnAttempt(k) => state.attempts == k,
            ConnectBehavior::Never | ConnectBehavior::BeginFails => false,
        };
        if connects {
            state.connected = true;
            LinkStatus::Connected
        } else {
            LinkStatus::Connecting
        }
    }

    async fn disconnect(&mut self) -> Result<(), RadioError> {
        let mut state = self.probe.state.lock();
        state.events.push(RadioEvent::Disconnect);
        state.connected = false;
        Ok(())
    }

    async fn power_off(&mut self) -> Result<(), RadioError> {
        let mut state = self.probe.state.lock();
        state.events.push(RadioEvent::PowerOff);
        state.connected = false;
        state.attempts = 0;
        Ok(())
    }
}

/// Request observed by [`ScriptedBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Bytes,
}

/// Backend transport returning scripted replies.
///
/// POSTs pop from the queue first and fall back to the default reply.
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
    fallback: Result<HttpReply, TransportError>,
    health: Result<HttpReply, TransportError>,
    latency: Duration,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new(fallback: Result<HttpReply, TransportError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            health: Ok(HttpReply::ok(r#"{"status":"ok"}"#)),
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Backend that answers every verification with `{"decision":"<decision>"}`.
    pub fn deciding(decision: &str) -> Self {
        Self::new(Ok(HttpReply::ok(format!(r#"{{"decision":"{}"}}"#, decision))))
    }

    pub fn unreachable() -> Self {
        let err = TransportError::Unreachable("connection refused".to_string());
        let mut backend = Self::new(Err(err.clone()));
        backend.health = Err(err);
        backend
    }

    /// Configure simulated latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_health(mut self, health: Result<HttpReply, TransportError>) -> Self {
        self.health = health;
        self
    }

    pub fn push_reply(&self, reply: Result<HttpReply, TransportError>) {
        self.queue.lock().push_back(reply);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn post_count(&self) -> usize {
        self.requests.lock().iter().filter(|r| r.method == "POST").count()
    }

    fn record(&self, method: &'static str, path: &str, body: Bytes) {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
    }
}

#[async_trait]
impl BackendTransport for ScriptedBackend {
    async fn post_json(&self, path: &str, body: Bytes) -> Result<HttpReply, TransportError> {
        self.record("POST", path, body);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let next = self.queue.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn get(&self, path: &str) -> Result<HttpReply, TransportError> {
        self.record("GET", path, Bytes::new());
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.health.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_radio_connects_after_polls() {
        let mut radio = FakeRadio::new(ConnectBehavior::AfterPolls(2));
        let probe = radio.probe();
        let creds = NetworkCredentials::new("ssid", "pass");

        assert_eq!(radio.link_status().await, LinkStatus::Idle);
        radio.begin_connect(&creds).await.unwrap();
        assert_eq!(radio.link_status().await, LinkStatus::Connecting);
        assert_eq!(radio.link_status().await, LinkStatus::Connected);
        assert!(probe.is_connected());

        radio.power_off().await.unwrap();
        assert_eq!(probe.power_offs(), 1);
        assert!(!probe.is_connected());
    }

    #[tokio::test]
    async fn fake_radio_on_attempt() {
        let mut radio = FakeRadio::new(ConnectBehavior::OnAttempt(2));
        let creds = NetworkCredentials::new("ssid", "pass");

        radio.begin_connect(&creds).await.unwrap();
        assert_eq!(radio.link_status().await, LinkStatus::Connecting);
        radio.disconnect().await.unwrap();
        radio.begin_connect(&creds).await.unwrap();
        assert_eq!(radio.link_status().await, LinkStatus::Connected);
    }

    #[test]
    fn scripted_backend_queue_then_fallback() {
        tokio_test::block_on(async {
            let backend = ScriptedBackend::deciding("ALLOW");
            backend.push_reply(Ok(HttpReply::new(503, "busy")));

            let first = backend.post_json("/v", Bytes::from_static(b"{}")).await.unwrap();
            assert_eq!(first.status, 503);
            let second = backend.post_json("/v", Bytes::from_static(b"{}")).await.unwrap();
            assert_eq!(second.body_text(), r#"{"decision":"ALLOW"}"#);
            assert_eq!(backend.post_count(), 2);
        });
    }
}
