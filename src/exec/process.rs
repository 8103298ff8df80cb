// src/exec/process.rs

//! Process backend built on `tokio::process`.
//!
//! Two launch modes:
//! - `Direct`: run the entrypoint on the host as-is (handy for development
//!   and tests).
//! - `Nsenter`: wrap the entrypoint in `nsenter --target <init pid>` so it
//!   joins the container's mount, UTS, IPC, network and PID namespaces.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BackendSection;
use crate::container::Container;
use crate::exec::backend::{BackendFuture, ExecBackend, ProcessDescriptor, ProcessInfo, StartCallback};
use crate::stdio::Pipes;
use crate::types::BackendKind;

/// How long output relays may run on once the process has exited.
pub const DEFAULT_OUTPUT_GRACE: Duration = Duration::from_secs(1);

type OutputRelay = JoinHandle<std::io::Result<u64>>;

#[derive(Debug, Clone)]
enum LaunchMode {
    Direct,
    Nsenter { path: PathBuf },
}

pub struct HostProcessBackend {
    mode: LaunchMode,
    default_shell: Option<String>,
    output_grace: Duration,
    /// Kill switches for processes that are still running, keyed by pid.
    running: Mutex<HashMap<u32, oneshot::Sender<()>>>,
}

impl fmt::Debug for HostProcessBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProcessBackend")
            .field("mode", &self.mode)
            .field("default_shell", &self.default_shell)
            .field("output_grace", &self.output_grace)
            .field("running", &self.running().len())
            .finish()
    }
}

impl HostProcessBackend {
    pub fn direct() -> Self {
        Self::with_mode(LaunchMode::Direct)
    }

    pub fn nsenter(path: impl Into<PathBuf>) -> Self {
        Self::with_mode(LaunchMode::Nsenter { path: path.into() })
    }

    pub fn from_config(section: &BackendSection) -> Self {
        let backend = match section.kind {
            BackendKind::Host => Self::direct(),
            BackendKind::Nsenter => Self::nsenter(&section.nsenter_path),
        };
        match &section.default_shell {
            Some(shell) => backend.with_default_shell(shell.clone()),
            None => backend,
        }
    }

    pub fn with_default_shell(mut self, shell: impl Into<String>) -> Self {
        self.default_shell = Some(shell.into());
        self
    }

    pub fn with_output_grace(mut self, grace: Duration) -> Self {
        self.output_grace = grace;
        self
    }

    /// Number of processes started by this backend that have not exited.
    pub fn running_count(&self) -> usize {
        self.running().len()
    }

    fn with_mode(mode: LaunchMode) -> Self {
        Self {
            mode,
            default_shell: None,
            output_grace: DEFAULT_OUTPUT_GRACE,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<()>>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn build_command(&self, container: &dyn Container, process: &ProcessDescriptor) -> Result<Command> {
        let entrypoint = if process.entrypoint.is_empty() {
            match &self.default_shell {
                Some(shell) => shell.clone(),
                None => bail!("no command specified and no default shell configured"),
            }
        } else {
            process.entrypoint.clone()
        };

        if process.tty {
            warn!(
                container = %container.id(),
                "tty requested but not supported by the process backend; using pipes"
            );
        }

        let cmd = match &self.mode {
            LaunchMode::Direct => {
                if let Some(user) = &process.user {
                    bail!("running as user '{user}' requires the nsenter backend");
                }
                if process.privileged {
                    debug!(container = %container.id(), "privileged flag has no effect for direct launches");
                }
                let mut c = Command::new(&entrypoint);
                c.args(&process.arguments);
                c
            }
            LaunchMode::Nsenter { path } => {
                let pid = container.init_pid().with_context(|| {
                    format!("container '{}' has no init pid to enter", container.id())
                })?;

                let mut c = Command::new(path);
                c.arg("--target")
                    .arg(pid.to_string())
                    .args(["--mount", "--uts", "--ipc", "--net", "--pid"]);

                if let Some(user) = &process.user {
                    let (uid, gid) = parse_user(user)?;
                    c.arg("--setuid").arg(uid.to_string());
                    c.arg("--setgid").arg(gid.to_string());
                }

                c.arg("--").arg(&entrypoint).args(&process.arguments);
                c
            }
        };

        Ok(cmd)
    }

    async fn run(
        &self,
        container: &dyn Container,
        process: &ProcessDescriptor,
        pipes: Pipes,
        on_start: StartCallback,
    ) -> Result<i32> {
        let mut cmd = self.build_command(container, process)?;
        let Pipes {
            stdin,
            mut stdout,
            mut stderr,
        } = pipes;

        if process.detach {
            // A detached process must outlive the caller: no pipes back to
            // it and a process group of its own.
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(false);
            #[cfg(unix)]
            cmd.process_group(0);
        } else {
            cmd.stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        }

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "spawning '{}' for container '{}'",
                process.entrypoint,
                container.id()
            )
        })?;

        let pid = child.id();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        if let Some(pid) = pid {
            self.running().insert(pid, kill_tx);
        }

        // Input relay is never awaited: the client may keep its input open
        // long after the process is gone.
        let input_relay = match (stdin, child.stdin.take()) {
            (Some(mut input), Some(mut child_in)) => Some(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut input, &mut child_in).await {
                    debug!(error = %e, "stdin relay ended");
                }
            })),
            _ => None,
        };

        let stdout_relay = child.stdout.take().map(|mut out| {
            tokio::spawn(async move { tokio::io::copy(&mut out, &mut stdout).await })
        });
        let stderr_relay = child.stderr.take().map(|mut err| {
            tokio::spawn(async move { tokio::io::copy(&mut err, &mut stderr).await })
        });

        info!(container = %container.id(), ?pid, detach = process.detach, "process started");
        on_start(ProcessInfo { pid });

        let waited = tokio::select! {
            status = child.wait() => status.with_context(|| {
                format!("waiting for process in container '{}'", container.id())
            }),
            Ok(()) = &mut kill_rx => {
                info!(container = %container.id(), ?pid, "termination requested; killing process");
                if let Err(e) = child.kill().await {
                    warn!(container = %container.id(), error = %e, "failed to kill process");
                }
                child.wait().await.context("reaping terminated process")
            }
        };

        if let Some(pid) = pid {
            self.running().remove(&pid);
        }
        if let Some(relay) = input_relay {
            relay.abort();
        }
        self.drain_output(container, [stdout_relay, stderr_relay])
            .await;

        Ok(exit_code(waited?))
    }

    /// Let the output relays finish what the process wrote before it exited.
    ///
    /// A background descendant that inherited the pipes can keep them open
    /// indefinitely; such relays are cut off after the output grace period.
    async fn drain_output(&self, container: &dyn Container, relays: [Option<OutputRelay>; 2]) {
        let deadline = Instant::now() + self.output_grace;
        for mut relay in relays.into_iter().flatten() {
            match tokio::time::timeout_at(deadline, &mut relay).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(e))) => debug!(error = %e, "output relay ended with error"),
                Ok(Err(e)) => debug!(error = %e, "output relay task failed"),
                Err(_) => {
                    relay.abort();
                    warn!(
                        container = %container.id(),
                        "output still open after the process exited; a background process may hold it"
                    );
                }
            }
        }
    }
}

impl ExecBackend for HostProcessBackend {
    fn execute<'a>(
        &'a self,
        container: &'a dyn Container,
        process: &'a ProcessDescriptor,
        pipes: Pipes,
        on_start: StartCallback,
    ) -> BackendFuture<'a> {
        Box::pin(self.run(container, process, pipes, on_start))
    }

    fn terminate(&self, container: &dyn Container, process: ProcessInfo) -> Result<()> {
        let Some(pid) = process.pid else {
            bail!("cannot terminate a process without a pid in container '{}'", container.id());
        };

        match self.running().remove(&pid) {
            Some(kill) => {
                if kill.send(()).is_err() {
                    debug!(container = %container.id(), pid, "process exited before termination");
                }
            }
            None => debug!(container = %container.id(), pid, "no running process to terminate"),
        }
        Ok(())
    }
}

/// Parse `uid` or `uid:gid`; gid defaults to uid.
fn parse_user(user: &str) -> Result<(u32, u32)> {
    let (uid, gid) = match user.split_once(':') {
        Some((uid, gid)) => (uid, Some(gid)),
        None => (user, None),
    };
    let uid: u32 = uid
        .trim()
        .parse()
        .with_context(|| format!("user '{user}' must be a numeric uid[:gid]"))?;
    let gid = match gid {
        Some(gid) => gid
            .trim()
            .parse()
            .with_context(|| format!("user '{user}' must be a numeric uid[:gid]"))?,
        None => uid,
    };
    Ok((uid, gid))
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
