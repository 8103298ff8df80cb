// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `execmux`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "execmux",
    version,
    about = "Run processes inside containers with attached or detached stdio.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `EXECMUX_CONFIG`, or `Execmux.toml` in the current directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `EXECMUX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print what would run, but don't start anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a command in a running container.
    #[command(disable_help_flag = true)]
    Exec(ExecFlags),

    /// Run a command in a container that has not been started.
    #[command(name = "run-in", disable_help_flag = true)]
    RunIn(ExecFlags),

    /// List configured containers and their state.
    Containers,
}

/// Flags shared by `exec` and `run-in`.
///
/// `-h` is the hostname, so help is only reachable as `--help`.
#[derive(Debug, Clone, Default, Args)]
pub struct ExecFlags {
    /// Give extended privileges to the process.
    #[arg(long)]
    pub privileged: bool,

    /// Keep stdin open and attach it.
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY.
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Container host name.
    #[arg(short = 'h', long, value_name = "NAME")]
    pub hostname: Option<String>,

    /// Run as this user, `uid[:gid]`.
    #[arg(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,

    /// Start the process and return without attaching.
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Container id.
    #[arg(value_name = "CONTAINER")]
    pub container: String,

    /// Command to run, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
