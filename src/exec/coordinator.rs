// src/exec/coordinator.rs

//! Exec coordinator: precondition checks, descriptor construction and the
//! backend invocation for one call.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::container::{Container, ContainerStore};
use crate::errors::{ExecmuxError, Result};
use crate::exec::backend::{ExecBackend, ProcessDescriptor, ProcessInfo, StartCallback};
use crate::request::ExecutionRequest;
use crate::stdio::Pipes;
use crate::types::CallVariant;

/// Everything the backend needs, resolved before any stream is touched.
#[derive(Debug, Clone)]
pub struct PreparedExec {
    pub container: Arc<dyn Container>,
    pub descriptor: ProcessDescriptor,
}

pub struct ExecCoordinator {
    containers: Arc<dyn ContainerStore>,
    backend: Arc<dyn ExecBackend>,
}

impl fmt::Debug for ExecCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecCoordinator").finish_non_exhaustive()
    }
}

impl ExecCoordinator {
    pub fn new(containers: Arc<dyn ContainerStore>, backend: Arc<dyn ExecBackend>) -> Self {
        Self {
            containers,
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ExecBackend> {
        &self.backend
    }

    /// Resolve the container, check the variant's precondition and build the
    /// process descriptor. No backend call happens here.
    pub fn prepare(&self, request: &ExecutionRequest) -> Result<PreparedExec> {
        let container = self
            .containers
            .get(&request.container)
            .ok_or_else(|| ExecmuxError::ContainerNotFound(request.container.clone()))?;

        check_precondition(request.variant, container.as_ref())?;

        let descriptor = ProcessDescriptor::from_request(request);
        debug!(
            container = %request.container,
            variant = %request.variant,
            entrypoint = %descriptor.entrypoint,
            args = ?descriptor.arguments,
            "prepared process descriptor"
        );

        Ok(PreparedExec {
            container,
            descriptor,
        })
    }

    /// Invoke the backend on its own task.
    ///
    /// `started` fires when the backend reports the process running; the
    /// returned receiver fires exactly once with the backend's outcome.
    pub fn launch(
        &self,
        prepared: PreparedExec,
        pipes: Pipes,
        started: oneshot::Sender<ProcessInfo>,
    ) -> oneshot::Receiver<Result<i32>> {
        let (done_tx, done_rx) = oneshot::channel();
        let backend = Arc::clone(&self.backend);

        tokio::spawn(async move {
            let PreparedExec {
                container,
                descriptor,
            } = prepared;
            let id = container.id().to_string();

            let on_start: StartCallback = Box::new(move |process: ProcessInfo| {
                let _ = started.send(process);
            });

            info!(
                container = %id,
                entrypoint = %descriptor.entrypoint,
                "invoking execution backend"
            );

            let outcome = backend
                .execute(container.as_ref(), &descriptor, pipes, on_start)
                .await
                .map_err(|cause| ExecmuxError::execution_failed(id.clone(), cause));

            match &outcome {
                Ok(code) => info!(container = %id, exit_code = code, "process exited"),
                Err(err) => warn!(container = %id, error = %err, "execution failed"),
            }

            if done_tx.send(outcome).is_err() {
                debug!(container = %id, "exec outcome dropped; call already torn down");
            }
        });

        done_rx
    }
}

/// Gate a call on the container's running state.
pub fn check_precondition(variant: CallVariant, container: &dyn Container) -> Result<()> {
    match (variant, container.is_running()) {
        (CallVariant::ExecInRunning, false) => {
            Err(ExecmuxError::ContainerNotRunning(container.id().to_string()))
        }
        (CallVariant::RunInStopped, true) => {
            Err(ExecmuxError::ContainerAlreadyStarted(container.id().to_string()))
        }
        _ => Ok(()),
    }
}
