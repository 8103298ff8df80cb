// src/stdio/channel.rs

//! Per-call stdio plumbing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::request::ExecutionRequest;
use crate::stdio::broadcast::{BoxedReader, BoxedWriter, BroadcastWriter, OutputSink, SinkWriter};

/// Default capacity of the stdin pipe, in bytes.
pub const DEFAULT_STDIN_BUFFER: usize = 64 * 1024;

/// Stream endpoints handed to the execution backend.
pub struct Pipes {
    /// Read end of the stdin pipe; `None` when stdin is not attached.
    pub stdin: Option<BoxedReader>,
    pub stdout: SinkWriter,
    pub stderr: SinkWriter,
}

impl fmt::Debug for Pipes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipes")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish()
    }
}

/// Stdio state owned by exactly one call.
///
/// Both output sinks always exist so the backend can write whether or not
/// anything attaches. The stdin pipe only exists when stdin is attached;
/// otherwise the input side is a writer that discards everything.
pub struct StdioChannel {
    stdout: Arc<BroadcastWriter>,
    stderr: Arc<BroadcastWriter>,
    stdin_attached: bool,
    stdin_writer: Mutex<Option<DuplexStream>>,
    stdin_reader: Mutex<Option<DuplexStream>>,
    released: CancellationToken,
    closed: AtomicBool,
}

impl fmt::Debug for StdioChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioChannel")
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("stdin_attached", &self.stdin_attached)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StdioChannel {
    pub fn open(request: &ExecutionRequest, stdin_buffer: usize) -> Self {
        Self::with_stdin(request.attach_stdin, stdin_buffer)
    }

    pub fn with_stdin(attach_stdin: bool, stdin_buffer: usize) -> Self {
        let (writer, reader) = if attach_stdin {
            let (w, r) = tokio::io::duplex(stdin_buffer.max(1));
            (Some(w), Some(r))
        } else {
            (None, None)
        };

        Self {
            stdout: Arc::new(BroadcastWriter::new("stdout")),
            stderr: Arc::new(BroadcastWriter::new("stderr")),
            stdin_attached: attach_stdin,
            stdin_writer: Mutex::new(writer),
            stdin_reader: Mutex::new(reader),
            released: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn stdin_attached(&self) -> bool {
        self.stdin_attached
    }

    pub fn stdout(&self) -> Arc<dyn OutputSink> {
        self.stdout.clone()
    }

    pub fn stderr(&self) -> Arc<dyn OutputSink> {
        self.stderr.clone()
    }

    /// Endpoints for the backend. The stdin read end can be taken once.
    pub fn backend_pipes(&self) -> Pipes {
        let stdin = take(&self.stdin_reader).map(|r| Box::new(r) as BoxedReader);
        Pipes {
            stdin,
            stdout: SinkWriter::new(self.stdout()),
            stderr: SinkWriter::new(self.stderr()),
        }
    }

    /// Writer feeding the backend's stdin.
    ///
    /// Returns the pipe's write end the first time when stdin is attached;
    /// otherwise a writer that accepts and discards any amount of input.
    /// Dropping or shutting down the pipe end signals end-of-input.
    pub fn stdin_writer(&self) -> BoxedWriter {
        match take(&self.stdin_writer) {
            Some(w) => Box::new(w),
            None => Box::new(tokio::io::sink()),
        }
    }

    /// Fires once the outputs are closed, i.e. the process is gone or the
    /// channel was torn down. Input copies select on it.
    pub fn released_token(&self) -> CancellationToken {
        self.released.clone()
    }

    /// Close both output sinks so every subscription drains and ends.
    pub fn close_outputs(&self) {
        self.stdout.close();
        self.stderr.close();
        self.released.cancel();
    }

    /// Tear everything down. Safe to call from any side, any number of
    /// times; returns true only for the call that actually closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.close_outputs();
        drop(take(&self.stdin_writer));
        drop(take(&self.stdin_reader));

        debug!(stdin_attached = self.stdin_attached, "stdio channel closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}
