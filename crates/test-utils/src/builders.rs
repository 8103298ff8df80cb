#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use execmux::config::{BackendSection, ConfigFile, ContainerSection, RawConfigFile, ServiceSection};
use execmux::container::{ContainerRecord, ContainerRegistry};
use execmux::engine::{ExecService, ServiceOptions};
use execmux::request::{fields, DispatchMessage, ExecutionRequest};
use execmux::types::{BackendKind, CallVariant};

use crate::fake_backend::{FakeBackend, Script};
use crate::recording::RecordingEvents;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                service: ServiceSection::default(),
                backend: BackendSection::default(),
                container: BTreeMap::new(),
            },
        }
    }

    pub fn with_container(mut self, id: &str, running: bool) -> Self {
        self.config.container.insert(
            id.to_string(),
            ContainerSection {
                running,
                ..ContainerSection::default()
            },
        );
        self
    }

    pub fn with_container_pid(mut self, id: &str, running: bool, pid: u32) -> Self {
        self.config.container.insert(
            id.to_string(),
            ContainerSection {
                running,
                pid: Some(pid),
                hostname: None,
            },
        );
        self
    }

    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.config.backend.kind = kind;
        self
    }

    pub fn with_drain_timeout(mut self, value: &str) -> Self {
        self.config.service.drain_timeout = value.to_string();
        self
    }

    pub fn with_stdin_buffer(mut self, bytes: usize) -> Self {
        self.config.service.stdin_buffer = bytes;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for dispatch messages as a remote client would send them.
pub struct MessageBuilder {
    msg: DispatchMessage,
}

impl MessageBuilder {
    pub fn new(job: &str) -> Self {
        Self {
            msg: DispatchMessage::new(job),
        }
    }

    pub fn exec(container: &str) -> Self {
        Self::new("exec").container(container)
    }

    pub fn runin(container: &str) -> Self {
        Self::new("runin").container(container)
    }

    pub fn container(mut self, id: &str) -> Self {
        self.msg.setenv(fields::CONTAINER, id);
        self
    }

    pub fn cmd(mut self, cmd: &[&str]) -> Self {
        let cmd: Vec<String> = cmd.iter().map(|s| s.to_string()).collect();
        self.msg.setenv_list(fields::CMD, &cmd);
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.msg.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.msg.setenv(key, value);
        self
    }

    pub fn flag(mut self, key: &str, value: bool) -> Self {
        self.msg.setenv_bool(key, value);
        self
    }

    /// Attach stdout and stderr, plus stdin when `stdin` is set.
    pub fn attach(self, stdin: bool) -> Self {
        self.flag(fields::ATTACH_STDIN, stdin)
            .flag(fields::ATTACH_STDOUT, true)
            .flag(fields::ATTACH_STDERR, true)
    }

    pub fn build(self) -> DispatchMessage {
        self.msg
    }

    pub fn request(self) -> ExecutionRequest {
        let variant = CallVariant::from_job_name(&self.msg.name).expect("known job name");
        ExecutionRequest::from_message(variant, &self.msg).expect("valid message")
    }
}

/// A service wired to a [`FakeBackend`], with the pieces tests poke at.
pub struct Harness {
    pub service: ExecService,
    pub backend: Arc<FakeBackend>,
    pub registry: Arc<ContainerRegistry>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    /// One running container `web` and one stopped container `db`.
    pub fn new(script: Script) -> Self {
        Self::with_drain_timeout(script, Duration::from_secs(5))
    }

    pub fn with_drain_timeout(script: Script, drain_timeout: Duration) -> Self {
        let registry = Arc::new(ContainerRegistry::new());
        registry.insert(ContainerRecord::new("web", true).with_pid(100));
        registry.insert(ContainerRecord::new("db", false));

        let backend = FakeBackend::new(script);
        let events = Arc::new(RecordingEvents::new());
        let options = ServiceOptions {
            drain_timeout,
            ..ServiceOptions::default()
        };
        let service = ExecService::new(registry.clone(), backend.clone(), options)
            .with_events(events.clone());

        Self {
            service,
            backend,
            registry,
            events,
        }
    }
}
