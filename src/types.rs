use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Which container-state precondition a call runs under.
///
/// Both exist on purpose: `ExecInRunning` enters a container that is already
/// up, `RunInStopped` runs a process in a container that has not been started
/// yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallVariant {
    ExecInRunning,
    RunInStopped,
}

impl CallVariant {
    /// Minimum number of command tokens a request must carry.
    pub fn min_command_tokens(self) -> usize {
        match self {
            CallVariant::ExecInRunning => 0,
            CallVariant::RunInStopped => 1,
        }
    }

    /// Name used for the dispatch message of this variant.
    pub fn job_name(self) -> &'static str {
        match self {
            CallVariant::ExecInRunning => "exec",
            CallVariant::RunInStopped => "runin",
        }
    }

    pub fn from_job_name(name: &str) -> Option<Self> {
        match name {
            "exec" => Some(CallVariant::ExecInRunning),
            "runin" | "run-in" => Some(CallVariant::RunInStopped),
            _ => None,
        }
    }
}

impl fmt::Display for CallVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

/// Successful result of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The process ran to completion with this exit status.
    Exited(i32),
    /// Detached call: the process was started and keeps running.
    Detached { pid: Option<u32> },
}

impl CallOutcome {
    /// Exit code to hand to a CLI front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            CallOutcome::Exited(code) => *code,
            CallOutcome::Detached { .. } => 0,
        }
    }
}

/// Which execution backend the service is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run the process directly on the host.
    #[default]
    Host,
    /// Enter the container's namespaces through `nsenter --target <pid>`.
    Nsenter,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "host" => Ok(BackendKind::Host),
            "nsenter" => Ok(BackendKind::Nsenter),
            other => Err(format!(
                "invalid backend kind: {other} (expected \"host\" or \"nsenter\")"
            )),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scaled_secs(value, 60, num_part, &unit),
        "h" => scaled_secs(value, 60 * 60, num_part, &unit),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn scaled_secs(value: u64, factor: u64, num_part: &str, unit: &str) -> Result<Duration, String> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{num_part}{unit}' is too large"))
}
