// src/container/registry.rs

//! In-memory [`ContainerStore`] backed by the config file.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::config::ConfigFile;
use crate::container::{Container, ContainerStore};

#[derive(Debug)]
pub struct ContainerRecord {
    id: String,
    running: AtomicBool,
    pid: Option<u32>,
    hostname: Option<String>,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, running: bool) -> Self {
        Self {
            id: id.into(),
            running: AtomicBool::new(running),
            pid: None,
            hostname: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}

impl Container for ContainerRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn init_pid(&self) -> Option<u32> {
        self.pid
    }

    fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: RwLock<BTreeMap<String, Arc<ContainerRecord>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        let registry = Self::new();
        for (id, section) in cfg.containers() {
            let mut record = ContainerRecord::new(id.clone(), section.running);
            if let Some(pid) = section.pid {
                record = record.with_pid(pid);
            }
            if let Some(hostname) = &section.hostname {
                record = record.with_hostname(hostname.clone());
            }
            registry.insert(record);
        }
        registry
    }

    /// Insert or replace a container, returning the stored handle.
    pub fn insert(&self, record: ContainerRecord) -> Arc<ContainerRecord> {
        let record = Arc::new(record);
        debug!(container = %record.id, running = record.is_running(), "registering container");
        self.write()
            .insert(record.id.clone(), Arc::clone(&record));
        record
    }

    /// Flip a container's running state. Returns false for unknown ids.
    pub fn set_running(&self, id: &str, running: bool) -> bool {
        match self.read().get(id) {
            Some(record) => {
                record.set_running(running);
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<ContainerRecord>>> {
        self.containers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<ContainerRecord>>> {
        self.containers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ContainerStore for ContainerRegistry {
    fn get(&self, id: &str) -> Option<Arc<dyn Container>> {
        self.read()
            .get(id)
            .map(|record| Arc::clone(record) as Arc<dyn Container>)
    }
}
