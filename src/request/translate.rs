// src/request/translate.rs

//! Translation of inbound requests into a typed [`ExecutionRequest`].

use tracing::debug;

use crate::cli::ExecFlags;
use crate::errors::{ExecmuxError, Result};
use crate::request::message::DispatchMessage;
use crate::types::CallVariant;

/// Field names of the dispatch message.
pub mod fields {
    pub const CONTAINER: &str = "Container";
    pub const CMD: &str = "Cmd";
    pub const USER: &str = "User";
    pub const HOSTNAME: &str = "Hostname";
    pub const PRIVILEGED: &str = "Privileged";
    pub const TTY: &str = "Tty";
    pub const ATTACH_STDIN: &str = "AttachStdin";
    pub const ATTACH_STDOUT: &str = "AttachStdout";
    pub const ATTACH_STDERR: &str = "AttachStderr";
    pub const DETACH: &str = "Detach";
}

/// Typed description of one exec/run-in call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub variant: CallVariant,
    pub container: String,
    /// First token is the entrypoint, the rest are its arguments.
    pub command: Vec<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub privileged: bool,
    pub tty: bool,
    pub detach: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

impl ExecutionRequest {
    /// Build a request from a dispatch message.
    ///
    /// `Container` is mandatory. The command comes from `Cmd`; when `Cmd` is
    /// absent the positional arguments are used instead.
    pub fn from_message(variant: CallVariant, msg: &DispatchMessage) -> Result<Self> {
        let container = msg
            .getenv(fields::CONTAINER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ExecmuxError::InvalidRequest(format!(
                    "Usage: {} container_id command (missing {} field)",
                    msg.name,
                    fields::CONTAINER
                ))
            })?
            .to_string();

        let command = msg
            .getenv_list(fields::CMD)
            .unwrap_or_else(|| msg.args.clone());

        let request = Self {
            variant,
            container,
            command,
            user: non_empty(msg.getenv(fields::USER)),
            hostname: non_empty(msg.getenv(fields::HOSTNAME)),
            privileged: msg.getenv_bool(fields::PRIVILEGED),
            tty: msg.getenv_bool(fields::TTY),
            detach: msg.getenv_bool(fields::DETACH),
            attach_stdin: msg.getenv_bool(fields::ATTACH_STDIN),
            attach_stdout: msg.getenv_bool(fields::ATTACH_STDOUT),
            attach_stderr: msg.getenv_bool(fields::ATTACH_STDERR),
        };

        request.check_command_tokens(&msg.name)?;
        Ok(request.normalized())
    }

    /// Build a request from parsed command-line flags.
    ///
    /// Without `--detach`, stdout and stderr are attached; stdin is attached
    /// only with `--interactive`.
    pub fn from_flags(variant: CallVariant, flags: &ExecFlags) -> Result<Self> {
        let container = flags.container.trim();
        if container.is_empty() {
            return Err(ExecmuxError::InvalidRequest(
                "container id must not be empty".to_string(),
            ));
        }

        let attach = !flags.detach;
        let request = Self {
            variant,
            container: container.to_string(),
            command: flags.command.clone(),
            user: non_empty(flags.user.as_deref()),
            hostname: non_empty(flags.hostname.as_deref()),
            privileged: flags.privileged,
            tty: flags.tty,
            detach: flags.detach,
            attach_stdin: attach && flags.interactive,
            attach_stdout: attach,
            attach_stderr: attach,
        };

        request.check_command_tokens(variant.job_name())?;
        Ok(request.normalized())
    }

    /// Encode this request as a dispatch message for `variant`'s job name.
    pub fn to_message(&self) -> DispatchMessage {
        let mut msg = DispatchMessage::new(self.variant.job_name());
        msg.setenv(fields::CONTAINER, self.container.clone())
            .setenv_list(fields::CMD, &self.command)
            .setenv_bool(fields::PRIVILEGED, self.privileged)
            .setenv_bool(fields::TTY, self.tty)
            .setenv_bool(fields::DETACH, self.detach)
            .setenv_bool(fields::ATTACH_STDIN, self.attach_stdin)
            .setenv_bool(fields::ATTACH_STDOUT, self.attach_stdout)
            .setenv_bool(fields::ATTACH_STDERR, self.attach_stderr);
        if let Some(user) = &self.user {
            msg.setenv(fields::USER, user.clone());
        }
        if let Some(hostname) = &self.hostname {
            msg.setenv(fields::HOSTNAME, hostname.clone());
        }
        msg
    }

    /// True if at least one client stream is attached.
    pub fn attaches_anything(&self) -> bool {
        self.attach_stdin || self.attach_stdout || self.attach_stderr
    }

    fn check_command_tokens(&self, job: &str) -> Result<()> {
        let min = self.variant.min_command_tokens();
        if self.command.len() < min {
            return Err(ExecmuxError::InvalidRequest(format!(
                "Usage: {job} container_id command (need at least {min} command token(s), got {})",
                self.command.len()
            )));
        }
        Ok(())
    }

    /// A detached request never attaches any stream.
    fn normalized(mut self) -> Self {
        if self.detach && self.attaches_anything() {
            debug!(
                container = %self.container,
                "detach requested; dropping stream attachments"
            );
            self.attach_stdin = false;
            self.attach_stdout = false;
            self.attach_stderr = false;
        }
        self
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
