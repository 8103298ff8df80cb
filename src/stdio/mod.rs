// src/stdio/mod.rs

//! Stdio plumbing for a single call.
//!
//! - [`broadcast`] holds the fan-out sink capability and its registry
//!   implementation.
//! - [`channel`] owns the per-call pair of sinks plus the optional stdin pipe.

pub mod broadcast;
pub mod channel;

pub use broadcast::{
    BoxedReader, BoxedWriter, BroadcastWriter, OutputSink, SinkWriter, SubscriberId, Subscription,
    DEFAULT_QUEUE_CAPACITY,
};
pub use channel::{Pipes, StdioChannel, DEFAULT_STDIN_BUFFER};
