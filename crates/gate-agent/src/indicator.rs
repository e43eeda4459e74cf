//! Host indicator outputs.
//!
//! The node has no panel or LEDs when run on a host, so both outputs are
//! rendered into the log.

use std::sync::Arc;
use std::time::Duration;

use gate_core::indicator::{IndicatorSink, Panel, Signal};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Logs each frame the way the 128x64 panel would show it.
#[derive(Default)]
pub struct ConsoleIndicator;

impl ConsoleIndicator {
    pub fn new() -> Self {
        Self
    }
}

impl IndicatorSink for ConsoleIndicator {
    fn render(&self, line1: &str, line2: &str) {
        let panel = Panel::layout(line1, line2);
        info!(line1 = %panel.line1, line2 = %panel.line2, "panel");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedState {
    Off,
    Green,
    RedBlinking,
}

pub const DENY_BLINKS: u32 = 3;
pub const DENY_BLINK_PERIOD: Duration = Duration::from_millis(150);

/// Two-colour status LED. Green is held for an allow, red blinks on a deny.
#[derive(Clone)]
pub struct LedSignal {
    state: Arc<Mutex<LedState>>,
}

impl Default for LedSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl LedSignal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedState::Off)),
        }
    }

    pub fn state(&self) -> LedState {
        *self.state.lock()
    }

    fn blink_red(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            info!(led = "red", "led on");
            return;
        };
        let state = self.state.clone();
        runtime.spawn(async move {
            for blink in 1..=DENY_BLINKS {
                if *state.lock() != LedState::RedBlinking {
                    return;
                }
                debug!(led = "red", blink, "led on");
                tokio::time::sleep(DENY_BLINK_PERIOD).await;
                debug!(led = "red", blink, "led off");
                tokio::time::sleep(DENY_BLINK_PERIOD).await;
            }
            let mut current = state.lock();
            if *current == LedState::RedBlinking {
                *current = LedState::Off;
            }
        });
    }
}

impl IndicatorSink for LedSignal {
    fn render(&self, _line1: &str, _line2: &str) {}

    fn signal(&self, signal: Signal) {
        match signal {
            Signal::Allow => {
                *self.state.lock() = LedState::Green;
                info!(led = "green", "led on");
            }
            Signal::Deny => {
                *self.state.lock() = LedState::RedBlinking;
                info!(led = "red", blinks = DENY_BLINKS, "led blinking");
                self.blink_red();
            }
            Signal::Clear => {
                let mut state = self.state.lock();
                if *state != LedState::Off {
                    *state = LedState::Off;
                    debug!("led off");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_holds_green_until_cleared() {
        let led = LedSignal::new();
        led.signal(Signal::Allow);
        assert_eq!(led.state(), LedState::Green);
        led.signal(Signal::Clear);
        assert_eq!(led.state(), LedState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn deny_blink_finishes_off() {
        let led = LedSignal::new();
        led.signal(Signal::Deny);
        assert_eq!(led.state(), LedState::RedBlinking);

        tokio::time::sleep(DENY_BLINK_PERIOD * 2 * DENY_BLINKS + Duration::from_millis(10)).await;
        assert_eq!(led.state(), LedState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn allow_after_deny_is_not_cleared_by_blink() {
        let led = LedSignal::new();
        led.signal(Signal::Deny);
        led.signal(Signal::Allow);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(led.state(), LedState::Green);
    }

    #[test]
    fn deny_without_runtime_does_not_panic() {
        let led = LedSignal::new();
        led.signal(Signal::Deny);
        assert_eq!(led.state(), LedState::RedBlinking);
    }

    #[test]
    fn console_ignores_signals() {
        ConsoleIndicator::new().signal(Signal::Allow);
        ConsoleIndicator::new().render("ALLOW-LONG-LINE-1", "x");
    }
}
