// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`backend`] defines the `ExecBackend` capability, the process
//!   descriptor handed to it and the start callback.
//! - [`coordinator`] checks container preconditions, builds the descriptor
//!   and runs the backend on its own task.
//! - [`process`] is the `tokio::process` backend used in production.

pub mod backend;
pub mod coordinator;
pub mod process;

pub use backend::{
    entrypoint_and_args, BackendFuture, ExecBackend, ProcessDescriptor, ProcessInfo, StartCallback,
};
pub use coordinator::{check_precondition, ExecCoordinator, PreparedExec};
pub use process::{HostProcessBackend, DEFAULT_OUTPUT_GRACE};
