// src/stdio/broadcast.rs

//! Fan-out output sink.
//!
//! A [`BroadcastWriter`] forwards every chunk written to it to all currently
//! subscribed destinations. Each destination is served by its own relay task
//! fed through a bounded queue, so:
//! - `write` never waits on a destination;
//! - per-destination order is the order of `write` calls;
//! - a destination whose writes fail is dropped without affecting others;
//! - a destination that falls a full queue behind is evicted and its relay
//!   ends with an error;
//! - a destination only sees chunks written while it was subscribed.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Chunks queued per destination before it counts as lagging.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Handle to one destination's relay.
///
/// The relay finishes once the destination is unsubscribed or the sink is
/// closed, after everything queued for it has been written.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    relay: JoinHandle<io::Result<()>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Stop relaying immediately, dropping anything still queued.
    pub fn abort(&self) {
        self.relay.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.relay.abort_handle()
    }

    /// Wait for the relay to finish delivering.
    pub async fn finished(self) -> io::Result<()> {
        match self.relay.await {
            Ok(res) => res,
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(join_err) => Err(io::Error::other(join_err.to_string())),
        }
    }
}

/// Broadcast capability shared by the backend (writer side) and the attach
/// coordinator (subscriber side).
pub trait OutputSink: Send + Sync {
    /// Add a destination. Nothing written before this call is replayed.
    fn subscribe(&self, dest: BoxedWriter) -> Subscription;

    /// Remove a destination. Returns false if it was not subscribed.
    fn unsubscribe(&self, id: SubscriberId) -> bool;

    /// Forward `bytes` to every current destination. Zero destinations is
    /// fine; the bytes are dropped.
    fn write(&self, bytes: &[u8]);

    /// Release every destination and refuse new ones. Idempotent.
    fn close(&self);

    fn subscriber_count(&self) -> usize;
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Bytes>,
    lagged: CancellationToken,
}

#[derive(Default)]
struct State {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    closed: bool,
}

/// Thread-safe [`OutputSink`] registry.
pub struct BroadcastWriter {
    name: &'static str,
    capacity: usize,
    state: Mutex<State>,
}

impl fmt::Debug for BroadcastWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("BroadcastWriter")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("subscribers", &state.subscribers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl BroadcastWriter {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputSink for BroadcastWriter {
    fn subscribe(&self, dest: BoxedWriter) -> Subscription {
        let (tx, rx) = mpsc::channel::<Bytes>(self.capacity);
        let lagged = CancellationToken::new();

        let id = {
            let mut state = self.state();
            let id = SubscriberId(state.next_id);
            state.next_id += 1;
            if state.closed {
                // Sender dropped here; the relay ends right away.
                debug!(sink = self.name, "subscribe on closed sink");
            } else {
                state.subscribers.push(Subscriber {
                    id,
                    tx,
                    lagged: lagged.clone(),
                });
            }
            id
        };

        let name = self.name;
        let relay = tokio::spawn(relay(name, self.capacity, rx, lagged, dest));
        trace!(sink = name, subscriber = id.0, "subscribed");

        Subscription { id, relay }
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|sub| sub.id != id);
        let removed = state.subscribers.len() != before;
        if removed {
            trace!(sink = self.name, subscriber = id.0, "unsubscribed");
        }
        removed
    }

    fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let chunk = Bytes::copy_from_slice(bytes);
        let name = self.name;

        let mut state = self.state();
        state.subscribers.retain(|sub| match sub.tx.try_send(chunk.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(sink = name, subscriber = sub.id.0, "destination fell behind; evicting");
                sub.lagged.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(sink = name, subscriber = sub.id.0, "dropping failed destination");
                false
            }
        });
    }

    fn close(&self) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.closed = true;
        let released = state.subscribers.len();
        state.subscribers.clear();
        debug!(sink = self.name, released, "sink closed");
    }

    fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }
}

async fn relay(
    name: &'static str,
    capacity: usize,
    mut rx: mpsc::Receiver<Bytes>,
    lagged: CancellationToken,
    mut dest: BoxedWriter,
) -> io::Result<()> {
    let lag_error =
        || io::Error::other(format!("{name} destination fell {capacity} chunks behind"));

    loop {
        let chunk = tokio::select! {
            biased;
            _ = lagged.cancelled() => return Err(lag_error()),
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };

        tokio::select! {
            biased;
            _ = lagged.cancelled() => return Err(lag_error()),
            res = write_chunk(&mut dest, &chunk) => {
                if let Err(e) = res {
                    debug!(sink = name, error = %e, "destination write failed");
                    return Err(e);
                }
            }
        }
    }
    dest.flush().await
}

async fn write_chunk(dest: &mut BoxedWriter, chunk: &[u8]) -> io::Result<()> {
    dest.write_all(chunk).await?;
    dest.flush().await
}

/// `AsyncWrite` end handed to the execution backend; every write lands in
/// the wrapped sink.
///
/// Shutting this writer down does not close the sink; that is up to the
/// owning [`StdioChannel`](crate::stdio::StdioChannel).
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn OutputSink>,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }
}

impl fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkWriter")
            .field("subscribers", &self.sink.subscriber_count())
            .finish()
    }
}

impl AsyncWrite for SinkWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sink.write(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
