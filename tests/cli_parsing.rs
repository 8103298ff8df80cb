// tests/cli_parsing.rs

use clap::Parser;

use execmux::cli::{CliArgs, Command, LogLevel};
use execmux::logging::resolve_level;
use execmux::request::ExecutionRequest;
use execmux::types::CallVariant;

#[test]
fn exec_flags_and_trailing_command() {
    let args = CliArgs::try_parse_from([
        "execmux", "exec", "-i", "-t", "-u", "0:0", "-h", "box", "web", "ls", "-la", "/tmp",
    ])
    .expect("valid command line");

    let flags = match args.command {
        Command::Exec(flags) => flags,
        other => panic!("expected exec, got {other:?}"),
    };
    assert!(flags.interactive && flags.tty);
    assert!(!flags.detach && !flags.privileged);
    assert_eq!(flags.user.as_deref(), Some("0:0"));
    assert_eq!(flags.hostname.as_deref(), Some("box"));
    assert_eq!(flags.container, "web");
    assert_eq!(flags.command, vec!["ls", "-la", "/tmp"]);

    let req = ExecutionRequest::from_flags(CallVariant::ExecInRunning, &flags).expect("request");
    assert!(req.attach_stdin && req.attach_stdout && req.attach_stderr);
}

#[test]
fn run_in_with_detach_and_global_flags() {
    let args = CliArgs::try_parse_from([
        "execmux",
        "--config",
        "/etc/execmux.toml",
        "run-in",
        "--privileged",
        "-d",
        "db",
        "/init",
        "--foreground",
    ])
    .expect("valid command line");

    assert_eq!(args.config.as_deref(), Some("/etc/execmux.toml"));
    let flags = match args.command {
        Command::RunIn(flags) => flags,
        other => panic!("expected run-in, got {other:?}"),
    };
    assert!(flags.privileged && flags.detach);
    assert_eq!(flags.command, vec!["/init", "--foreground"]);
}

#[test]
fn container_and_command_are_both_required() {
    assert!(CliArgs::try_parse_from(["execmux", "exec"]).is_err());
    assert!(CliArgs::try_parse_from(["execmux", "exec", "web"]).is_err());
    assert!(CliArgs::try_parse_from(["execmux", "run-in", "db"]).is_err());
}

#[test]
fn dry_run_and_containers_subcommand() {
    let args = CliArgs::try_parse_from(["execmux", "--dry-run", "containers"])
        .expect("valid command line");
    assert!(args.dry_run);
    assert!(matches!(args.command, Command::Containers));
}

#[test]
fn long_help_is_still_available() {
    let err = CliArgs::try_parse_from(["execmux", "exec", "--help"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
}

#[test]
fn log_level_flag_beats_environment() {
    assert_eq!(
        resolve_level(Some(LogLevel::Debug), Some("error")),
        tracing::Level::DEBUG
    );
    assert_eq!(resolve_level(None, Some(" Trace ")), tracing::Level::TRACE);
    assert_eq!(resolve_level(None, Some("loud")), tracing::Level::WARN);
    assert_eq!(resolve_level(None, None), tracing::Level::WARN);
}
