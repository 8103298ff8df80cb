// src/engine/mod.rs

//! Call synchronization engine.
//!
//! Every exec/run-in call runs two independent parties against one
//! [`StdioChannel`](crate::stdio::StdioChannel):
//! - the attach coordinator, relaying the client's streams;
//! - the exec coordinator, running the process through the backend.
//!
//! Whichever produces a terminal outcome first decides the call's result.
//! The other one is then wound down, and the channel is closed exactly once
//! when both have finished.
//!
//! The pure state machine lives in [`core`]; the async shell that races the
//! two parties and executes the core's commands is in [`runtime`].
//! [`events`] is the observability hook the shell reports through.

use std::time::Duration;

use crate::attach::AttachOutcome;
use crate::config::ConfigFile;
use crate::errors::Result;
use crate::exec::ProcessInfo;
use crate::stdio::DEFAULT_STDIN_BUFFER;

pub mod core;
pub mod events;
pub mod runtime;

pub use self::core::{CallCommand, CallCore, CallPhase, CallStep};
pub use self::events::{ExecEvent, ExecEventSink, TracingEventSink};
pub use self::runtime::{CallHandle, ExecService};

/// Inputs to the call state machine.
#[derive(Debug)]
pub enum CallSignal {
    /// Both coordinators have been started.
    Launched,
    /// The attach coordinator released the client, successfully or not.
    AttachFinished(AttachOutcome),
    /// The backend returned.
    ExecFinished(Result<i32>),
    /// The backend reported the process running. `None` means the start
    /// callback was dropped without firing.
    ProcessStarted(Option<ProcessInfo>),
    /// The caller gave up on the call.
    CancelRequested,
    /// The grace period for the attach side to drain has elapsed.
    DrainExpired,
}

/// Knobs shared by every call an [`ExecService`] runs.
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// How long the attach side may keep draining output after the process
    /// exited before it is released forcibly.
    pub drain_timeout: Duration,
    /// Capacity of each call's stdin pipe, in bytes.
    pub stdin_buffer: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            stdin_buffer: DEFAULT_STDIN_BUFFER,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            drain_timeout: cfg.drain_timeout(),
            stdin_buffer: cfg.stdin_buffer(),
        }
    }
}
