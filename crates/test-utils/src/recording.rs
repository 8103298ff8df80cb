use std::sync::Mutex;
use std::time::Duration;

use execmux::engine::{ExecEvent, ExecEventSink};

/// Event sink that keeps everything it is sent.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<ExecEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&ExecEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn channel_closed_count(&self) -> usize {
        self.count(|e| matches!(e, ExecEvent::ChannelClosed { .. }))
    }

    /// Poll until an event matching `pred` has been recorded.
    pub async fn wait_for(&self, pred: impl Fn(&ExecEvent) -> bool) {
        while self.count(&pred) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl ExecEventSink for RecordingEvents {
    fn emit(&self, event: ExecEvent) {
        self.events.lock().unwrap().push(event);
    }
}
