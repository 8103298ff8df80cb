// src/engine/core.rs

//! Pure call state machine.
//!
//! [`CallCore`] consumes [`CallSignal`]s and produces a [`CallStep`]:
//! - at most one resolution for the caller over the whole call;
//! - a list of commands for the async shell (close outputs, release the
//!   attach side, terminate the process, close the channel).
//!
//! It holds no channels, no Tokio types and performs no IO, so race
//! orderings can be replayed deterministically in tests.

use tracing::debug;

use crate::engine::CallSignal;
use crate::errors::{ExecmuxError, Result};
use crate::exec::ProcessInfo;
use crate::request::ExecutionRequest;
use crate::types::CallOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Created, coordinators not yet running.
    Starting,
    /// Both coordinators running, nothing decided.
    Racing,
    AttachFailed,
    ExecFailed,
    ExecSucceeded,
    Detached,
    Cancelled,
    /// Both sides finished and the channel was closed.
    Closed,
}

impl CallPhase {
    /// A phase in which the caller already has its answer.
    pub fn is_resolved(self) -> bool {
        !matches!(self, CallPhase::Starting | CallPhase::Racing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    /// Close both output sinks; attached clients drain and get released.
    CloseOutputs,
    /// Start the bounded wait for the attach side to drain.
    ArmDrainTimer,
    /// Cancel the attach coordinator's token.
    ReleaseAttach,
    /// Ask the backend to stop the process.
    Terminate(ProcessInfo),
    /// Close the stdio channel. Emitted exactly once per call.
    CloseChannel,
}

/// Result of feeding one signal into the core.
#[derive(Debug, Default)]
pub struct CallStep {
    /// Set on the one step that decides the call.
    pub resolution: Option<Result<CallOutcome>>,
    pub commands: Vec<CallCommand>,
}

#[derive(Debug)]
pub struct CallCore {
    container: String,
    detach: bool,
    phase: CallPhase,
    /// Terminal phase the call resolved with; survives `Closed`.
    outcome: Option<CallPhase>,
    attach_done: bool,
    exec_done: bool,
    process: Option<ProcessInfo>,
    /// Cancellation arrived before the process reported started.
    terminate_on_start: bool,
}

impl CallCore {
    pub fn new(request: &ExecutionRequest) -> Self {
        Self::with_container(request.container.clone(), request.detach)
    }

    pub fn with_container(container: impl Into<String>, detach: bool) -> Self {
        Self {
            container: container.into(),
            detach,
            phase: CallPhase::Starting,
            outcome: None,
            attach_done: false,
            exec_done: false,
            process: None,
            terminate_on_start: false,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<CallPhase> {
        self.outcome
    }

    pub fn is_closed(&self) -> bool {
        self.phase == CallPhase::Closed
    }

    pub fn process(&self) -> Option<ProcessInfo> {
        self.process
    }

    pub fn step(&mut self, signal: CallSignal) -> CallStep {
        let mut step = CallStep::default();
        if self.is_closed() {
            debug!(container = %self.container, ?signal, "signal after close ignored");
            return step;
        }

        match signal {
            CallSignal::Launched => {
                if self.phase == CallPhase::Starting {
                    self.phase = CallPhase::Racing;
                }
            }
            CallSignal::AttachFinished(outcome) => {
                self.attach_done = true;
                match outcome {
                    // A clean release is never terminal; the exit status
                    // still decides the call.
                    Ok(()) => {}
                    Err(err) if self.outcome.is_none() => {
                        self.resolve(
                            CallPhase::AttachFailed,
                            Err(ExecmuxError::AttachFailed(err)),
                            &mut step,
                        );
                    }
                    Err(err) => {
                        debug!(container = %self.container, error = %err, "late attach failure discarded");
                    }
                }
            }
            CallSignal::ExecFinished(result) => {
                self.exec_done = true;
                self.terminate_on_start = false;
                step.commands.push(CallCommand::CloseOutputs);

                if self.outcome.is_none() {
                    match result {
                        Ok(code) => self.resolve(
                            CallPhase::ExecSucceeded,
                            Ok(CallOutcome::Exited(code)),
                            &mut step,
                        ),
                        Err(err) => self.resolve(CallPhase::ExecFailed, Err(err), &mut step),
                    }
                } else {
                    debug!(container = %self.container, ?result, "exec outcome after resolution discarded");
                }

                if !self.attach_done {
                    step.commands.push(CallCommand::ArmDrainTimer);
                }
            }
            CallSignal::ProcessStarted(Some(info)) => {
                self.process = Some(info);
                if self.terminate_on_start && !self.exec_done {
                    self.terminate_on_start = false;
                    step.commands.push(CallCommand::Terminate(info));
                } else if self.detach && self.outcome.is_none() {
                    self.resolve(
                        CallPhase::Detached,
                        Ok(CallOutcome::Detached { pid: info.pid }),
                        &mut step,
                    );
                }
            }
            CallSignal::ProcessStarted(None) => {
                debug!(container = %self.container, "backend returned without reporting a start");
            }
            CallSignal::CancelRequested => {
                // A detached process is meant to outlive its caller.
                if self.outcome == Some(CallPhase::Detached) {
                    debug!(container = %self.container, "cancel after detach ignored");
                } else {
                    if self.outcome.is_none() {
                        let err = ExecmuxError::Cancelled(self.container.clone());
                        self.resolve(CallPhase::Cancelled, Err(err), &mut step);
                    }
                    if !self.attach_done {
                        step.commands.push(CallCommand::ReleaseAttach);
                    }
                    if !self.exec_done {
                        match self.process {
                            Some(info) => step.commands.push(CallCommand::Terminate(info)),
                            None => self.terminate_on_start = true,
                        }
                    }
                }
            }
            CallSignal::DrainExpired => {
                if !self.attach_done {
                    debug!(container = %self.container, "drain timeout elapsed; releasing attach");
                    step.commands.push(CallCommand::ReleaseAttach);
                }
            }
        }

        if self.attach_done && self.exec_done {
            step.commands.push(CallCommand::CloseChannel);
            self.phase = CallPhase::Closed;
        }

        step
    }

    fn resolve(&mut self, phase: CallPhase, result: Result<CallOutcome>, step: &mut CallStep) {
        debug!(container = %self.container, ?phase, "call resolved");
        self.phase = phase;
        self.outcome = Some(phase);
        step.resolution = Some(result);
    }
}
