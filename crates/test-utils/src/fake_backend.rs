//! Scriptable execution backend that never touches the OS.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use execmux::container::Container;
use execmux::exec::{BackendFuture, ExecBackend, ProcessDescriptor, ProcessInfo, StartCallback};
use execmux::stdio::Pipes;

/// Exit code reported for a process stopped through `terminate`.
pub const TERMINATED_EXIT_CODE: i32 = 137;

/// What the fake "process" does once started.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Chunks written to stdout, in order.
    pub stdout: Vec<Vec<u8>>,
    /// Chunks written to stderr, in order.
    pub stderr: Vec<Vec<u8>>,
    /// Copy stdin to stdout until end-of-input.
    pub echo_stdin: bool,
    pub exit_code: i32,
    /// Fail before starting, with this message.
    pub fail: Option<String>,
    /// Run until terminated.
    pub block: bool,
    /// Delay before reporting the process started.
    pub start_delay: Option<Duration>,
    /// Delay between the output and the exit.
    pub exit_delay: Option<Duration>,
    /// Return without ever calling the start callback.
    pub silent_start: bool,
    pub pid: Option<u32>,
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            pid: Some(4242),
            ..Self::default()
        }
    }

    pub fn blocking() -> Self {
        Self {
            block: true,
            pid: Some(4242),
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn stdout(mut self, chunk: &str) -> Self {
        self.stdout.push(chunk.as_bytes().to_vec());
        self
    }

    pub fn stderr(mut self, chunk: &str) -> Self {
        self.stderr.push(chunk.as_bytes().to_vec());
        self
    }

    pub fn echo_stdin(mut self) -> Self {
        self.echo_stdin = true;
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = Some(delay);
        self
    }

    pub fn silent_start(mut self) -> Self {
        self.silent_start = true;
        self
    }
}

/// One `execute` call as the backend saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub container: String,
    pub process: ProcessDescriptor,
    pub stdin_attached: bool,
}

/// A fake backend that:
/// - records every invocation
/// - plays its [`Script`] against the call's pipes
/// - stops blocked "processes" when `terminate` is called.
#[derive(Debug, Default)]
pub struct FakeBackend {
    script: Mutex<Script>,
    invocations: Mutex<Vec<Invocation>>,
    terminated: Mutex<Vec<ProcessInfo>>,
    kill: CancellationToken,
}

impl FakeBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Self::default()
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn terminated(&self) -> Vec<ProcessInfo> {
        self.terminated.lock().unwrap().clone()
    }

    /// Stop every blocked "process", as if killed from outside.
    pub fn kill_all(&self) {
        self.kill.cancel();
    }
}

impl ExecBackend for FakeBackend {
    fn execute<'a>(
        &'a self,
        container: &'a dyn Container,
        process: &'a ProcessDescriptor,
        pipes: Pipes,
        on_start: StartCallback,
    ) -> BackendFuture<'a> {
        let script = self.script.lock().unwrap().clone();
        self.invocations.lock().unwrap().push(Invocation {
            container: container.id().to_string(),
            process: process.clone(),
            stdin_attached: pipes.stdin.is_some(),
        });
        let kill = self.kill.clone();

        Box::pin(async move {
            if let Some(message) = script.fail {
                bail!(message);
            }

            let Pipes {
                stdin,
                mut stdout,
                mut stderr,
            } = pipes;

            if let Some(delay) = script.start_delay {
                tokio::time::sleep(delay).await;
            }
            if !script.silent_start {
                on_start(ProcessInfo { pid: script.pid });
            }

            for chunk in &script.stdout {
                stdout.write_all(chunk).await?;
            }
            for chunk in &script.stderr {
                stderr.write_all(chunk).await?;
            }

            if script.echo_stdin {
                if let Some(mut input) = stdin {
                    tokio::io::copy(&mut input, &mut stdout).await?;
                }
            }

            if script.block {
                kill.cancelled().await;
                return Ok(TERMINATED_EXIT_CODE);
            }

            if let Some(delay) = script.exit_delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = kill.cancelled() => return Ok(TERMINATED_EXIT_CODE),
                }
            }

            Ok(script.exit_code)
        })
    }

    fn terminate(&self, container: &dyn Container, process: ProcessInfo) -> anyhow::Result<()> {
        if process.pid.is_none() {
            bail!("cannot terminate a process without a pid in container '{}'", container.id());
        }
        self.terminated.lock().unwrap().push(process);
        self.kill.cancel();
        Ok(())
    }
}
