// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The exec coordinator talks to an `ExecBackend` instead of spawning
//! processes itself. Production code uses
//! [`HostProcessBackend`](crate::exec::HostProcessBackend); tests provide a
//! scriptable fake that never touches the OS.

use std::future::Future;
use std::pin::Pin;

use crate::container::Container;
use crate::request::ExecutionRequest;
use crate::stdio::Pipes;

/// Backend-facing description of the process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    /// Empty when the request carried no command; the backend decides what
    /// that means.
    pub entrypoint: String,
    pub arguments: Vec<String>,
    pub user: Option<String>,
    pub privileged: bool,
    pub tty: bool,
    /// The process must outlive the caller, so its stdio is not relayed.
    pub detach: bool,
}

impl ProcessDescriptor {
    pub fn from_request(request: &ExecutionRequest) -> Self {
        let (entrypoint, arguments) = entrypoint_and_args(&request.command);
        Self {
            entrypoint,
            arguments,
            user: request.user.clone(),
            privileged: request.privileged,
            tty: request.tty,
            detach: request.detach,
        }
    }
}

/// Split a command into its entrypoint and arguments.
pub fn entrypoint_and_args(command: &[String]) -> (String, Vec<String>) {
    match command.split_first() {
        Some((entrypoint, args)) => (entrypoint.clone(), args.to_vec()),
        None => (String::new(), Vec::new()),
    }
}

/// What the backend reports once the process is actually running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessInfo {
    pub pid: Option<u32>,
}

/// Invoked exactly once, when the process has started.
pub type StartCallback = Box<dyn FnOnce(ProcessInfo) + Send>;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<i32>> + Send + 'a>>;

/// Capability that actually creates processes inside containers.
pub trait ExecBackend: Send + Sync {
    /// Run `process` inside `container` to completion and return its exit
    /// status.
    ///
    /// The backend reads input from `pipes.stdin` (if any) and writes output
    /// to `pipes.stdout` / `pipes.stderr`. It must call `on_start` once the
    /// process is running, and must have written all of the process's output
    /// before the returned future resolves. A detached process is not tied
    /// to `pipes` at all.
    fn execute<'a>(
        &'a self,
        container: &'a dyn Container,
        process: &'a ProcessDescriptor,
        pipes: Pipes,
        on_start: StartCallback,
    ) -> BackendFuture<'a>;

    /// Ask the backend to stop a process it started. A process that already
    /// exited is not an error.
    fn terminate(&self, container: &dyn Container, process: ProcessInfo) -> anyhow::Result<()>;
}
