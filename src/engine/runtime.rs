// src/engine/runtime.rs

use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attach::{self, AttachOutcome, ClientStreams};
use crate::container::{Container, ContainerStore};
use crate::errors::{AttachError, ExecmuxError, Result};
use crate::exec::{ExecBackend, ExecCoordinator, ProcessInfo};
use crate::request::{DispatchMessage, DispatchResponse, ExecutionRequest};
use crate::stdio::StdioChannel;
use crate::types::{CallOutcome, CallVariant};

use super::core::{CallCommand, CallCore, CallStep};
use super::events::{ExecEvent, ExecEventSink, TracingEventSink};
use super::{CallSignal, ServiceOptions};

/// Entry point for exec/run-in calls.
///
/// Each call gets its own stdio channel, attach coordinator, exec
/// coordinator and driver task. Calls share nothing but the container store,
/// the backend and the event sink, so any number can run concurrently.
pub struct ExecService {
    exec: ExecCoordinator,
    events: Arc<dyn ExecEventSink>,
    options: ServiceOptions,
}

impl fmt::Debug for ExecService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecService")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ExecService {
    pub fn new(
        containers: Arc<dyn ContainerStore>,
        backend: Arc<dyn ExecBackend>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            exec: ExecCoordinator::new(containers, backend),
            events: Arc::new(TracingEventSink),
            options,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn ExecEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    /// Translate a dispatch message and run the call it names.
    pub async fn dispatch(
        &self,
        msg: &DispatchMessage,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> Result<CallOutcome> {
        self.spawn_dispatch(msg, client, cancel)?.outcome().await
    }

    /// Translate a dispatch message and start the call it names.
    pub fn spawn_dispatch(
        &self,
        msg: &DispatchMessage,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> Result<CallHandle> {
        let variant = CallVariant::from_job_name(&msg.name).ok_or_else(|| {
            ExecmuxError::InvalidRequest(format!("unknown job '{}'", msg.name))
        })?;
        let request = ExecutionRequest::from_message(variant, msg)?;
        self.spawn_call(request, client, cancel)
    }

    /// Like [`dispatch`](Self::dispatch), folded into a wire response.
    pub async fn handle(
        &self,
        msg: &DispatchMessage,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> DispatchResponse {
        DispatchResponse::from_result(&self.dispatch(msg, client, cancel).await)
    }

    /// Run a command in a container that is already running.
    pub async fn exec_in_running(
        &self,
        mut request: ExecutionRequest,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> Result<CallOutcome> {
        request.variant = CallVariant::ExecInRunning;
        self.call(request, client, cancel).await
    }

    /// Run a command in a container that has not been started.
    pub async fn run_in_stopped(
        &self,
        mut request: ExecutionRequest,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> Result<CallOutcome> {
        request.variant = CallVariant::RunInStopped;
        self.call(request, client, cancel).await
    }

    /// Run one call under `request.variant`'s precondition.
    ///
    /// Resolves as soon as the outcome is decided. Winding down the losing
    /// side and closing the channel continue in the background.
    pub async fn call(
        &self,
        request: ExecutionRequest,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> Result<CallOutcome> {
        self.spawn_call(request, client, cancel)?.outcome().await
    }

    /// Start a call and hand back its handle without waiting for anything.
    ///
    /// Precondition failures return here, before any stream is touched.
    pub fn spawn_call(
        &self,
        request: ExecutionRequest,
        client: ClientStreams,
        cancel: CancellationToken,
    ) -> Result<CallHandle> {
        let prepared = self.exec.prepare(&request)?;
        let container = Arc::clone(&prepared.container);

        self.events.emit(ExecEvent::CallStarted {
            container: request.container.clone(),
            variant: request.variant,
        });

        let channel = Arc::new(StdioChannel::open(&request, self.options.stdin_buffer));
        let call_token = cancel.child_token();
        let attach_token = call_token.child_token();

        let attach_rx = attach::attach(
            Arc::clone(&channel),
            &request,
            client,
            attach_token.clone(),
        );

        let (started_tx, started_rx) = oneshot::channel();
        let exec_rx = self
            .exec
            .launch(prepared, channel.backend_pipes(), started_tx);

        let (result_tx, result_rx) = oneshot::channel();
        let driver = CallDriver {
            core: CallCore::new(&request),
            channel,
            container,
            backend: Arc::clone(self.exec.backend()),
            events: Arc::clone(&self.events),
            drain_timeout: self.options.drain_timeout,
            call_token,
            attach_token,
            result_tx: Some(result_tx),
        };
        let driver = tokio::spawn(driver.run(attach_rx, exec_rx, started_rx));

        Ok(CallHandle {
            container: request.container,
            result: Some(result_rx),
            driver,
        })
    }
}

/// A call in flight.
///
/// Dropping the handle does not stop the call.
#[derive(Debug)]
pub struct CallHandle {
    container: String,
    result: Option<oneshot::Receiver<Result<CallOutcome>>>,
    driver: JoinHandle<()>,
}

impl CallHandle {
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Wait for the call's result. Only the first call gets it.
    pub async fn outcome(&mut self) -> Result<CallOutcome> {
        let Some(rx) = self.result.take() else {
            return Err(ExecmuxError::Other(anyhow!(
                "outcome of call into container {} was already taken",
                self.container
            )));
        };
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ExecmuxError::Other(anyhow!(
                "call into container {} ended without a result",
                self.container
            ))),
        }
    }

    /// True once both sides finished and the stdio channel was closed.
    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }

    /// Wait until both sides finished and the stdio channel was closed.
    pub async fn closed(self) {
        if let Err(e) = self.driver.await {
            warn!(container = %self.container, error = %e, "call driver task failed");
        }
    }
}

/// Async shell around [`CallCore`] for one call.
struct CallDriver {
    core: CallCore,
    channel: Arc<StdioChannel>,
    container: Arc<dyn Container>,
    backend: Arc<dyn ExecBackend>,
    events: Arc<dyn ExecEventSink>,
    drain_timeout: Duration,
    call_token: CancellationToken,
    attach_token: CancellationToken,
    result_tx: Option<oneshot::Sender<Result<CallOutcome>>>,
}

impl CallDriver {
    async fn run(
        mut self,
        mut attach_rx: oneshot::Receiver<AttachOutcome>,
        mut exec_rx: oneshot::Receiver<Result<i32>>,
        mut started_rx: oneshot::Receiver<ProcessInfo>,
    ) {
        let mut attach_pending = true;
        let mut exec_pending = true;
        let mut started_pending = true;
        let mut cancel_seen = false;
        let mut drain: Option<Pin<Box<Sleep>>> = None;

        let step = self.core.step(CallSignal::Launched);
        self.apply(step, &mut drain);

        while !self.core.is_closed() {
            // Order matters when several outcomes are ready at once.
            let signal = tokio::select! {
                biased;

                _ = self.call_token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    CallSignal::CancelRequested
                }
                res = &mut exec_rx, if exec_pending => {
                    exec_pending = false;
                    CallSignal::ExecFinished(res.unwrap_or_else(|_| {
                        Err(ExecmuxError::execution_failed(
                            self.container.id(),
                            anyhow!("execution task ended without reporting"),
                        ))
                    }))
                }
                res = &mut attach_rx, if attach_pending => {
                    attach_pending = false;
                    CallSignal::AttachFinished(res.unwrap_or(Err(AttachError::Lost)))
                }
                res = &mut started_rx, if started_pending => {
                    started_pending = false;
                    let info = res.ok();
                    if let Some(info) = info {
                        self.events.emit(ExecEvent::ProcessStarted {
                            container: self.container.id().to_string(),
                            pid: info.pid,
                        });
                    }
                    CallSignal::ProcessStarted(info)
                }
                _ = async {
                    match drain.as_mut() {
                        Some(timer) => timer.await,
                        None => pending().await,
                    }
                }, if drain.is_some() => {
                    drain = None;
                    CallSignal::DrainExpired
                }
                else => {
                    warn!(container = %self.container.id(), "call driver has nothing left to wait on");
                    break;
                }
            };

            let step = self.core.step(signal);
            self.apply(step, &mut drain);
        }

        debug!(
            container = %self.container.id(),
            outcome = ?self.core.outcome(),
            "call driver finished"
        );
    }

    fn apply(&mut self, step: CallStep, drain: &mut Option<Pin<Box<Sleep>>>) {
        let CallStep {
            resolution,
            commands,
        } = step;

        for command in commands {
            match command {
                CallCommand::CloseOutputs => self.channel.close_outputs(),
                CallCommand::ArmDrainTimer => {
                    *drain = Some(Box::pin(tokio::time::sleep(self.drain_timeout)));
                }
                CallCommand::ReleaseAttach => self.attach_token.cancel(),
                CallCommand::Terminate(process) => {
                    info!(container = %self.container.id(), pid = ?process.pid, "terminating process");
                    if let Err(e) = self.backend.terminate(self.container.as_ref(), process) {
                        warn!(container = %self.container.id(), error = %e, "terminate failed");
                    }
                }
                CallCommand::CloseChannel => {
                    if self.channel.close() {
                        self.events.emit(ExecEvent::ChannelClosed {
                            container: self.container.id().to_string(),
                        });
                    }
                }
            }
        }

        if let Some(result) = resolution {
            if let Some(phase) = self.core.outcome() {
                self.events.emit(ExecEvent::CallResolved {
                    container: self.container.id().to_string(),
                    phase,
                });
            }
            if let Some(tx) = self.result_tx.take() {
                if tx.send(result).is_err() {
                    debug!(container = %self.container.id(), "caller went away before the result");
                }
            }
        }
    }
}
