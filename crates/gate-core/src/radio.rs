//! Radio lifecycle manager.
//!
//! The long-range radio is shared with the short-range transport's timing, so
//! it stays parked until a verification needs it. The manager owns the driver
//! outright; nothing else touches it.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gate_transport::{
    BackoffPolicy, LinkStatus, NetworkCredentials, PowerSaveMode, RadioDriver,
};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

type SharedDriver = Arc<AsyncMutex<Box<dyn RadioDriver>>>;
type SharedState = Arc<Mutex<RadioState>>;

/// Radio state as tracked by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioState {
    Down,
    Connecting { attempt: u32 },
    Up,
    /// Every attempt of the last acquisition failed. The next `acquire()`
    /// starts over.
    FailedPermanently,
}

/// Outcome of [`RadioLifecycleManager::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready,
    Failed,
}

/// What `release()` does with a connected radio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RadioPolicy {
    /// Disassociate and power off after every cycle.
    #[default]
    TearDownAfterUse,
    /// Diagnostic mode: leave the link up between cycles.
    KeepAlive,
}

#[derive(Clone, Debug)]
pub struct RadioConfig {
    pub backoff: BackoffPolicy,
    /// How long one attempt may take to associate.
    pub connect_window: Duration,
    /// Link status poll cadence within an attempt.
    pub poll_interval: Duration,
    pub policy: RadioPolicy,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            connect_window: Duration::from_secs(12),
            poll_interval: Duration::from_millis(250),
            policy: RadioPolicy::default(),
        }
    }
}

/// The scoped acquisition in [`RadioLifecycleManager::with_radio`] could not
/// bring the radio up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("radio unavailable after all connection attempts")]
pub struct RadioUnavailable;

/// Acquisition statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RadioStats {
    pub acquisitions: u32,
    pub failures: u32,
    pub releases: u32,
}

pub struct RadioLifecycleManager {
    driver: SharedDriver,
    credentials: NetworkCredentials,
    config: RadioConfig,
    state: SharedState,
    acquisitions: AtomicU32,
    failures: AtomicU32,
    releases: AtomicU32,
}

impl RadioLifecycleManager {
    pub fn new(
        driver: impl RadioDriver + 'static,
        credentials: NetworkCredentials,
        config: RadioConfig,
    ) -> Self {
        Self {
            driver: Arc::new(AsyncMutex::new(Box::new(driver))),
            credentials,
            config,
            state: Arc::new(Mutex::new(RadioState::Down)),
            acquisitions: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            releases: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> RadioState {
        *self.state.lock()
    }

    fn set_state(&self, next: RadioState) {
        set_state(&self.state, next);
    }

    pub fn stats(&self) -> RadioStats {
        RadioStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }

    /// Bring the network path up.
    ///
    /// Short-circuits when the radio is already up. Otherwise runs up to
    /// `backoff.max_attempts` connection attempts with exponential backoff
    /// between them, holding minimum-modem power save throughout.
    pub async fn acquire(&self) -> Acquire {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let mut driver = self.driver.lock().await;

        if self.state() == RadioState::Up {
            if driver.link_status().await == LinkStatus::Connected {
                debug!("radio already up");
                return Acquire::Ready;
            }
            warn!("radio link lost, reconnecting");
        }

        let max_attempts = self.config.backoff.max_attempts;
        for attempt in 1..=max_attempts {
            self.set_state(RadioState::Connecting { attempt });
            info!(attempt, max_attempts, ssid = %self.credentials.ssid, "connecting radio");

            if self.try_connect(&mut **driver).await {
                self.set_state(RadioState::Up);
                info!(attempt, "radio connected");
                return Acquire::Ready;
            }

            warn!(attempt, "radio connect attempt failed");
            if let Err(e) = driver.disconnect().await {
                warn!(error = %e, "abort of failed attempt reported an error");
            }

            if self.config.backoff.should_retry(attempt) {
                let delay = self.config.backoff.delay_after(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                sleep(delay).await;
            }
        }

        if let Err(e) = driver.power_off().await {
            warn!(error = %e, "power off after failed acquisition reported an error");
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.set_state(RadioState::FailedPermanently);
        warn!(max_attempts, "radio unavailable");
        Acquire::Failed
    }

    async fn try_connect(&self, driver: &mut dyn RadioDriver) -> bool {
        // Coexistence: power save must be in force before association starts.
        if let Err(e) = driver.set_power_save(PowerSaveMode::MinModem).await {
            warn!(error = %e, "could not enable power save");
            return false;
        }
        if let Err(e) = driver.begin_connect(&self.credentials).await {
            warn!(error = %e, "begin connect failed");
            return false;
        }
        // Some drivers reset power save when association starts.
        if let Err(e) = driver.set_power_save(PowerSaveMode::MinModem).await {
            warn!(error = %e, "could not re-assert power save");
            return false;
        }

        let deadline = Instant::now() + self.config.connect_window;
        loop {
            match driver.link_status().await {
                LinkStatus::Connected => return true,
                LinkStatus::Failed => return false,
                LinkStatus::Idle | LinkStatus::Connecting => {}
            }
            if Instant::now() >= deadline {
                debug!(window_ms = self.config.connect_window.as_millis() as u64, "connect window elapsed");
                return false;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Hand the radio back after use.
    ///
    /// Under [`RadioPolicy::TearDownAfterUse`] this disassociates and powers
    /// off. Idempotent once the radio is down.
    pub async fn release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        if self.config.policy == RadioPolicy::KeepAlive && self.state() == RadioState::Up {
            debug!("keeping radio up (diagnostic mode)");
            return;
        }
        self.park().await;
    }

    /// Tear the radio down regardless of policy.
    pub async fn park(&self) {
        park(&self.driver, &self.state).await;
    }

    /// Power the radio off at startup so it cannot contend with advertising.
    pub async fn park_at_boot(&self) {
        let mut driver = self.driver.lock().await;
        if let Err(e) = driver.power_off().await {
            warn!(error = %e, "power off at boot failed");
        }
        self.set_state(RadioState::Down);
    }

    /// Run `f` with the radio acquired, releasing it once `f` completes.
    ///
    /// If the returned future is dropped while `f` is still running, the
    /// radio is parked from a background task.
    pub async fn with_radio<F, Fut, T>(&self, f: F) -> Result<T, RadioUnavailable>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.acquire().await {
            Acquire::Ready => {}
            Acquire::Failed => return Err(RadioUnavailable),
        }
        let mut guard = ParkOnDrop {
            driver: self.driver.clone(),
            state: self.state.clone(),
            armed: true,
        };
        let out = f().await;
        self.release().await;
        guard.armed = false;
        Ok(out)
    }
}

fn set_state(state: &Mutex<RadioState>, next: RadioState) {
    let mut state = state.lock();
    if *state != next {
        debug!(from = ?*state, to = ?next, "radio state");
        *state = next;
    }
}

async fn park(driver: &AsyncMutex<Box<dyn RadioDriver>>, state: &Mutex<RadioState>) {
    let mut driver = driver.lock().await;
    let current = *state.lock();
    match current {
        RadioState::Down | RadioState::FailedPermanently => return,
        RadioState::Up | RadioState::Connecting { .. } => {}
    }
    if let Err(e) = driver.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    if let Err(e) = driver.power_off().await {
        warn!(error = %e, "power off failed");
    }
    set_state(state, RadioState::Down);
    info!("radio parked");
}

/// Parks the radio if a scoped acquisition is cancelled mid-body.
struct ParkOnDrop {
    driver: SharedDriver,
    state: SharedState,
    armed: bool,
}

impl Drop for ParkOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("radio use cancelled outside a runtime, cannot park");
            return;
        };
        warn!("radio use cancelled, parking");
        let driver = self.driver.clone();
        let state = self.state.clone();
        runtime.spawn(async move { park(&driver, &state).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_transport::{ConnectBehavior, FakeRadio, RadioEvent};
    use std::sync::atomic::AtomicBool;

    fn manager(radio: FakeRadio, policy: RadioPolicy) -> RadioLifecycleManager {
        RadioLifecycleManager::new(
            radio,
            NetworkCredentials::new("MOKA", "secret"),
            RadioConfig {
                policy,
                ..RadioConfig::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_connects_with_power_save_first() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        assert_eq!(mgr.acquire().await, Acquire::Ready);
        assert_eq!(mgr.state(), RadioState::Up);

        let events = probe.events();
        assert_eq!(events[0], RadioEvent::PowerSave(PowerSaveMode::MinModem));
        assert_eq!(events[1], RadioEvent::BeginConnect);
        assert_eq!(probe.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_short_circuits_when_up() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        assert_eq!(mgr.acquire().await, Acquire::Ready);
        assert_eq!(mgr.acquire().await, Acquire::Ready);
        assert_eq!(probe.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_when_link_dropped_while_up() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::KeepAlive);

        assert_eq!(mgr.acquire().await, Acquire::Ready);
        probe.drop_link();
        assert_eq!(mgr.acquire().await, Acquire::Ready);
        assert_eq!(probe.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn three_attempts_with_backoff_then_failed() {
        let radio = FakeRadio::never_connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        let started = Instant::now();
        assert_eq!(mgr.acquire().await, Acquire::Failed);
        let elapsed = started.elapsed();

        assert_eq!(probe.connect_attempts(), 3);
        assert_eq!(probe.power_offs(), 1);
        assert_eq!(mgr.state(), RadioState::FailedPermanently);
        // Three 12 s windows plus 1 s and 2 s of backoff.
        assert!(elapsed >= Duration::from_secs(39), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(41), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let radio = FakeRadio::new(ConnectBehavior::OnAttempt(3));
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        assert_eq!(mgr.acquire().await, Acquire::Ready);
        assert_eq!(probe.connect_attempts(), 3);
        assert_eq!(probe.disconnects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_failure_counts_as_attempt() {
        let radio = FakeRadio::new(ConnectBehavior::BeginFails);
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        assert_eq!(mgr.acquire().await, Acquire::Failed);
        assert_eq!(probe.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_state_retries_from_scratch() {
        let radio = FakeRadio::never_connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        assert_eq!(mgr.acquire().await, Acquire::Failed);
        assert_eq!(mgr.acquire().await, Acquire::Failed);
        assert_eq!(probe.connect_attempts(), 6);
        assert_eq!(mgr.stats().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_tears_down_and_is_idempotent() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        mgr.acquire().await;
        mgr.release().await;
        mgr.release().await;

        assert_eq!(mgr.state(), RadioState::Down);
        assert_eq!(probe.power_offs(), 1);
        assert!(!probe.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_leaves_link_up() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::KeepAlive);

        mgr.acquire().await;
        mgr.release().await;
        assert_eq!(mgr.state(), RadioState::Up);
        assert_eq!(probe.power_offs(), 0);

        mgr.park().await;
        assert_eq!(mgr.state(), RadioState::Down);
        assert_eq!(probe.power_offs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn with_radio_releases_after_body() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::TearDownAfterUse);

        let out = mgr.with_radio(|| async { 7 }).await;
        assert_eq!(out, Ok(7));
        assert_eq!(probe.power_offs(), 1);
        assert_eq!(mgr.stats().releases, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn with_radio_skips_body_when_unavailable() {
        let mgr = manager(FakeRadio::never_connecting(), RadioPolicy::TearDownAfterUse);

        let ran = AtomicBool::new(false);
        let out = mgr.with_radio(|| async { ran.store(true, Ordering::SeqCst) }).await;
        assert_eq!(out, Err(RadioUnavailable));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(mgr.stats().releases, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn with_radio_parks_when_cancelled() {
        let radio = FakeRadio::connecting();
        let probe = radio.probe();
        let mgr = manager(radio, RadioPolicy::KeepAlive);

        let cancelled = tokio::time::timeout(
            Duration::from_secs(5),
            mgr.with_radio(|| std::future::pending::<()>()),
        )
        .await;
        assert!(cancelled.is_err());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(mgr.state(), RadioState::Down);
        assert_eq!(probe.power_offs(), 1);
        assert!(!probe.is_connected());
        assert_eq!(mgr.stats().releases, 0);
    }
}
