// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::stdio::DEFAULT_STDIN_BUFFER;
use crate::types::BackendKind;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [service]
/// drain_timeout = "5s"
/// stdin_buffer = 65536
///
/// [backend]
/// kind = "nsenter"
/// nsenter_path = "/usr/bin/nsenter"
/// default_shell = "/bin/sh"
///
/// [container.web]
/// running = true
/// pid = 4242
/// ```
///
/// All sections are optional and have defaults, but validation requires at
/// least one `[container.<id>]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub service: ServiceSection,

    #[serde(default)]
    pub backend: BackendSection,

    /// Keys are container identifiers.
    #[serde(default)]
    pub container: BTreeMap<String, ContainerSection>,
}

/// `[service]` section: per-call behaviour of the exec service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    /// How long a finished call waits for attached clients to drain their
    /// output before their subscriptions are torn down.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,

    /// Capacity of the stdin pipe in bytes.
    #[serde(default = "default_stdin_buffer")]
    pub stdin_buffer: usize,
}

fn default_drain_timeout() -> String {
    "5s".to_string()
}

fn default_stdin_buffer() -> usize {
    DEFAULT_STDIN_BUFFER
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
            stdin_buffer: default_stdin_buffer(),
        }
    }
}

/// `[backend]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_nsenter_path")]
    pub nsenter_path: String,

    /// Entrypoint used when a request carries no command.
    #[serde(default)]
    pub default_shell: Option<String>,
}

fn default_nsenter_path() -> String {
    "nsenter".to_string()
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            nsenter_path: default_nsenter_path(),
            default_shell: None,
        }
    }
}

/// `[container.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerSection {
    #[serde(default)]
    pub running: bool,

    #[serde(default)]
    pub pid: Option<u32>,

    #[serde(default)]
    pub hostname: Option<String>,
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    service: ServiceSection,
    backend: BackendSection,
    container: BTreeMap<String, ContainerSection>,
    drain_timeout: Duration,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        service: ServiceSection,
        backend: BackendSection,
        container: BTreeMap<String, ContainerSection>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            service,
            backend,
            container,
            drain_timeout,
        }
    }

    pub fn service(&self) -> &ServiceSection {
        &self.service
    }

    pub fn backend(&self) -> &BackendSection {
        &self.backend
    }

    pub fn containers(&self) -> impl Iterator<Item = (&String, &ContainerSection)> {
        self.container.iter()
    }

    pub fn container(&self, id: &str) -> Option<&ContainerSection> {
        self.container.get(id)
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn stdin_buffer(&self) -> usize {
        self.service.stdin_buffer
    }
}
