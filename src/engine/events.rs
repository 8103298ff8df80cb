// src/engine/events.rs

//! Lifecycle notifications for exec calls.

use tracing::{debug, info};

use crate::engine::CallPhase;
use crate::types::CallVariant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    CallStarted {
        container: String,
        variant: CallVariant,
    },
    ProcessStarted {
        container: String,
        pid: Option<u32>,
    },
    CallResolved {
        container: String,
        phase: CallPhase,
    },
    ChannelClosed {
        container: String,
    },
}

/// Receives lifecycle events from every call an
/// [`ExecService`](crate::engine::ExecService) runs.
pub trait ExecEventSink: Send + Sync {
    fn emit(&self, event: ExecEvent);
}

/// Default sink: turns events into log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl ExecEventSink for TracingEventSink {
    fn emit(&self, event: ExecEvent) {
        match event {
            ExecEvent::CallStarted { container, variant } => {
                info!(%container, %variant, "call started");
            }
            ExecEvent::ProcessStarted { container, pid } => {
                info!(%container, ?pid, "process running");
            }
            ExecEvent::CallResolved { container, phase } => {
                info!(%container, ?phase, "call resolved");
            }
            ExecEvent::ChannelClosed { container } => {
                debug!(%container, "stdio channel closed");
            }
        }
    }
}
