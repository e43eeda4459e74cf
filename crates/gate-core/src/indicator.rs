//! Indicator sink and panel layout.
//!
//! The engine is the only caller. Sinks must return promptly and swallow
//! their own failures; nothing is reported back to the engine.

use std::sync::Arc;

use parking_lot::Mutex;

/// Clip width of the large first line on the 128x64 panel.
pub const LINE1_MAX: usize = 10;
/// Clip width of the small second line on the 128x64 panel.
pub const LINE2_MAX: usize = 21;

/// Binary allow/deny output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Allow,
    Deny,
    Clear,
}

pub trait IndicatorSink: Send + Sync {
    /// Show two lines of text.
    fn render(&self, line1: &str, line2: &str);

    /// Drive the binary output, if the sink has one.
    fn signal(&self, _signal: Signal) {}
}

/// Fixed screens shown by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    Ready,
    Verifying,
    Allowed { gate_id: String },
    Denied { reason: String },
}

impl Screen {
    pub fn lines(&self) -> (String, String) {
        match self {
            Screen::Ready => ("READY".to_string(), "Write token".to_string()),
            Screen::Verifying => ("VERIFY".to_string(), "Sending...".to_string()),
            Screen::Allowed { gate_id } => ("ALLOW".to_string(), format!("Gate {}", gate_id)),
            Screen::Denied { reason } => ("DENY".to_string(), reason.clone()),
        }
    }
}

/// Two lines clipped to the panel's widths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Panel {
    pub line1: String,
    pub line2: String,
}

impl Panel {
    pub fn layout(line1: &str, line2: &str) -> Self {
        Self {
            line1: line1.chars().take(LINE1_MAX).collect(),
            line2: line2.chars().take(LINE2_MAX).collect(),
        }
    }
}

/// Sends every call to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn IndicatorSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn IndicatorSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl IndicatorSink for FanoutSink {
    fn render(&self, line1: &str, line2: &str) {
        for sink in &self.sinks {
            sink.render(line1, line2);
        }
    }

    fn signal(&self, signal: Signal) {
        for sink in &self.sinks {
            sink.signal(signal);
        }
    }
}

/// Indicator call captured by [`RecordingSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Render { line1: String, line2: String },
    Signal(Signal),
}

/// Sink that records everything it is asked to show.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Rendered line pairs, in order, without signals.
    pub fn renders(&self) -> Vec<(String, String)> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::Render { line1, line2 } => Some((line1.clone(), line2.clone())),
                Frame::Signal(_) => None,
            })
            .collect()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::Signal(s) => Some(*s),
                Frame::Render { .. } => None,
            })
            .collect()
    }

    pub fn last_render(&self) -> Option<(String, String)> {
        self.renders().pop()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl IndicatorSink for RecordingSink {
    fn render(&self, line1: &str, line2: &str) {
        self.frames.lock().push(Frame::Render {
            line1: line1.to_string(),
            line2: line2.to_string(),
        });
    }

    fn signal(&self, signal: Signal) {
        self.frames.lock().push(Frame::Signal(signal));
    }
}
