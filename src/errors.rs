// src/errors.rs

//! Crate-wide error types.
//!
//! [`ExecmuxError`] is what a single exec/run-in call returns to its caller.
//! Every variant is local to that call; nothing here is fatal to the process
//! hosting the service.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecmuxError {
    /// Malformed or incomplete request; surfaced verbatim, never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("No such container: {0}")]
    ContainerNotFound(String),

    #[error("Container {0} is not running")]
    ContainerNotRunning(String),

    #[error("Container {0} is already started")]
    ContainerAlreadyStarted(String),

    /// A stream copy or subscription failed. Says nothing about the process.
    #[error("attach failed with error: {0}")]
    AttachFailed(#[from] AttachError),

    #[error("Cannot run in container {container}: {cause:#}")]
    ExecutionFailed {
        container: String,
        cause: anyhow::Error,
    },

    #[error("call into container {0} was cancelled")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecmuxError {
    pub fn execution_failed(container: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        ExecmuxError::ExecutionFailed {
            container: container.into(),
            cause: cause.into(),
        }
    }
}

/// Which client-facing stream an attach failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        };
        f.write_str(name)
    }
}

/// Failure of one stream relationship set up by the attach coordinator.
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("{stream} copy failed: {source}")]
    Copy {
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{stream} relay task ended abnormally: {reason}")]
    Aborted { stream: StreamKind, reason: String },

    #[error("attach coordinator exited without reporting")]
    Lost,
}

impl AttachError {
    pub fn copy(stream: StreamKind, source: std::io::Error) -> Self {
        AttachError::Copy { stream, source }
    }

    /// The stream this failure is about, if it is about a single stream.
    pub fn stream(&self) -> Option<StreamKind> {
        match self {
            AttachError::Copy { stream, .. } | AttachError::Aborted { stream, .. } => {
                Some(*stream)
            }
            AttachError::Lost => None,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ExecmuxError>;
