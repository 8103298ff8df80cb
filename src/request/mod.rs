// src/request/mod.rs

//! Request translation.
//!
//! - [`message`] defines the command-dispatch message and its reply.
//! - [`translate`] turns a message, or parsed CLI flags, into an
//!   [`ExecutionRequest`].

pub mod message;
pub mod translate;

pub use message::{DispatchMessage, DispatchResponse};
pub use translate::{fields, ExecutionRequest};
