// src/attach/mod.rs

//! Attach coordinator.
//!
//! Wires a client's streams into a call's [`StdioChannel`]:
//! - client input is copied into the stdin pipe by a background task that
//!   closes the pipe's write end on end-of-input or read error;
//! - client stdout/stderr are subscribed to the matching fan-out sink.
//!
//! The coordinator does not know when the process ends. Its single-shot
//! outcome fires once every subscription has been released, which happens
//! when the channel's outputs are closed (the process exited) or when the
//! cancellation token fires. A failing stream copy reports first and tears
//! the remaining relays down.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{AttachError, StreamKind};
use crate::request::ExecutionRequest;
use crate::stdio::{BoxedReader, BoxedWriter, OutputSink, StdioChannel, SubscriberId};

pub type AttachOutcome = std::result::Result<(), AttachError>;

const INPUT_CHUNK: usize = 8 * 1024;

/// The client's side of the streams. Any of them may be missing.
#[derive(Default)]
pub struct ClientStreams {
    pub stdin: Option<BoxedReader>,
    pub stdout: Option<BoxedWriter>,
    pub stderr: Option<BoxedWriter>,
}

impl fmt::Debug for ClientStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStreams")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl ClientStreams {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_stdin(mut self, stdin: BoxedReader) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_stdout(mut self, stdout: BoxedWriter) -> Self {
        self.stdout = Some(stdout);
        self
    }

    pub fn with_stderr(mut self, stderr: BoxedWriter) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// The current process's own stdio.
    pub fn process_stdio() -> Self {
        Self {
            stdin: Some(Box::new(tokio::io::stdin())),
            stdout: Some(Box::new(tokio::io::stdout())),
            stderr: Some(Box::new(tokio::io::stderr())),
        }
    }
}

/// One output destination the coordinator is responsible for.
struct Attached {
    stream: StreamKind,
    sink: Arc<dyn OutputSink>,
    id: SubscriberId,
    abort: AbortHandle,
}

/// Start attaching `client` to `channel` according to `request`.
///
/// Subscriptions are in place when this returns, so nothing the backend
/// writes afterwards is missed. The returned receiver fires exactly once.
pub fn attach(
    channel: Arc<StdioChannel>,
    request: &ExecutionRequest,
    client: ClientStreams,
    cancel: CancellationToken,
) -> oneshot::Receiver<AttachOutcome> {
    let (done_tx, done_rx) = oneshot::channel();
    let container = request.container.clone();
    let ClientStreams {
        stdin,
        stdout,
        stderr,
    } = client;

    let mut attached = Vec::new();
    let mut outputs: JoinSet<(StreamKind, io::Result<()>)> = JoinSet::new();

    for (stream, wanted, dest, sink) in [
        (StreamKind::Stdout, request.attach_stdout, stdout, channel.stdout()),
        (StreamKind::Stderr, request.attach_stderr, stderr, channel.stderr()),
    ] {
        match (wanted, dest) {
            (true, Some(dest)) => {
                let subscription = sink.subscribe(dest);
                attached.push(Attached {
                    stream,
                    sink,
                    id: subscription.id(),
                    abort: subscription.abort_handle(),
                });
                outputs.spawn(async move { (stream, subscription.finished().await) });
            }
            (true, None) => {
                debug!(container = %container, %stream, "attach requested but client has no such stream");
            }
            (false, _) => {}
        }
    }

    let input = match (request.attach_stdin, stdin) {
        (true, Some(reader)) => Some(spawn_input_copy(
            reader,
            channel.stdin_writer(),
            channel.released_token(),
            cancel.clone(),
        )),
        (true, None) => {
            // Nothing will ever feed the pipe; signal end-of-input now.
            drop(channel.stdin_writer());
            None
        }
        (false, _) => None,
    };

    debug!(
        container = %container,
        outputs = attached.len(),
        stdin = input.is_some(),
        "client attached"
    );

    tokio::spawn(async move {
        let outcome = supervise(attached, outputs, input, cancel).await;
        match &outcome {
            Ok(()) => debug!(container = %container, "attach released"),
            Err(err) => warn!(container = %container, error = %err, "attach failed"),
        }
        let _ = done_tx.send(outcome);
    });

    done_rx
}

async fn supervise(
    attached: Vec<Attached>,
    mut outputs: JoinSet<(StreamKind, io::Result<()>)>,
    mut input: Option<JoinHandle<AttachOutcome>>,
    cancel: CancellationToken,
) -> AttachOutcome {
    while !outputs.is_empty() || input.is_some() {
        tokio::select! {
            joined = outputs.join_next(), if !outputs.is_empty() => {
                if let Some(Ok((stream, Err(e)))) = joined {
                    release(&attached, input.take());
                    return Err(AttachError::copy(stream, e));
                }
            }
            res = async {
                match input.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            }, if input.is_some() => {
                input = None;
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        release(&attached, None);
                        return Err(err);
                    }
                    Err(join_err) if join_err.is_cancelled() => {}
                    Err(join_err) => {
                        release(&attached, None);
                        return Err(AttachError::Aborted {
                            stream: StreamKind::Stdin,
                            reason: join_err.to_string(),
                        });
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!(streams = attached.len(), "attach cancelled; releasing streams");
                release(&attached, input.take());
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Drop every subscription this coordinator holds and stop the input copy.
fn release(attached: &[Attached], input: Option<JoinHandle<AttachOutcome>>) {
    for a in attached {
        a.sink.unsubscribe(a.id);
        a.abort.abort();
        debug!(stream = %a.stream, "released subscription");
    }
    if let Some(input) = input {
        input.abort();
    }
}

fn spawn_input_copy(
    mut reader: BoxedReader,
    mut writer: BoxedWriter,
    released: CancellationToken,
    cancel: CancellationToken,
) -> JoinHandle<AttachOutcome> {
    tokio::spawn(async move {
        let res = tokio::select! {
            res = copy_input(&mut reader, &mut writer) => res,
            _ = released.cancelled() => Ok(()),
            _ = cancel.cancelled() => Ok(()),
        };
        // End-of-input for the backend.
        let _ = writer.shutdown().await;
        res
    })
}

/// Copy client input into the pipe.
///
/// Read errors are attach failures. Write errors only mean the backend
/// stopped reading its input, which ends the copy quietly.
async fn copy_input(reader: &mut BoxedReader, writer: &mut BoxedWriter) -> AttachOutcome {
    let mut buf = vec![0u8; INPUT_CHUNK];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| AttachError::copy(StreamKind::Stdin, e))?;
        if n == 0 {
            debug!("client input reached end-of-input");
            return Ok(());
        }
        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!(error = %e, "backend no longer reads input");
            return Ok(());
        }
    }
}
