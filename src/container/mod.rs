// src/container/mod.rs

//! Container lookup capability.
//!
//! Containers are owned and tracked elsewhere; a call only needs to find one
//! by identifier and ask whether it is running.

use std::fmt::Debug;
use std::sync::Arc;

pub mod registry;

pub use registry::{ContainerRecord, ContainerRegistry};

/// A container a process can be executed in.
pub trait Container: Send + Sync + Debug {
    fn id(&self) -> &str;

    fn is_running(&self) -> bool;

    /// PID of the container's init process, when known. Backends that enter
    /// namespaces need it.
    fn init_pid(&self) -> Option<u32> {
        None
    }

    fn hostname(&self) -> Option<&str> {
        None
    }
}

/// Lookup of containers by identifier.
pub trait ContainerStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<dyn Container>>;
}
