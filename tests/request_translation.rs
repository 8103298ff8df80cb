// tests/request_translation.rs

mod common;
use crate::common::{init_tracing, TestResult};

use proptest::prelude::*;

use execmux::cli::ExecFlags;
use execmux::errors::ExecmuxError;
use execmux::request::{fields, DispatchMessage, DispatchResponse, ExecutionRequest};
use execmux::types::{CallOutcome, CallVariant};
use execmux_test_utils::builders::MessageBuilder;

fn flags(container: &str, command: &[&str]) -> ExecFlags {
    ExecFlags {
        container: container.to_string(),
        command: command.iter().map(|s| s.to_string()).collect(),
        ..ExecFlags::default()
    }
}

#[test]
fn message_with_cmd_list_builds_request() -> TestResult {
    init_tracing();

    let msg = MessageBuilder::exec("web")
        .cmd(&["echo", "hi there"])
        .env(fields::USER, "1000:1000")
        .env(fields::HOSTNAME, "box")
        .flag(fields::TTY, true)
        .attach(true)
        .build();

    let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg)?;

    assert_eq!(req.variant, CallVariant::ExecInRunning);
    assert_eq!(req.container, "web");
    assert_eq!(req.command, vec!["echo".to_string(), "hi there".to_string()]);
    assert_eq!(req.user.as_deref(), Some("1000:1000"));
    assert_eq!(req.hostname.as_deref(), Some("box"));
    assert!(req.tty);
    assert!(!req.privileged);
    assert!(!req.detach);
    assert!(req.attach_stdin && req.attach_stdout && req.attach_stderr);
    Ok(())
}

#[test]
fn missing_container_is_invalid_request() {
    let msg = MessageBuilder::new("exec").cmd(&["ls"]).build();
    let err = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg).unwrap_err();
    assert!(matches!(err, ExecmuxError::InvalidRequest(_)), "got {err:?}");

    let blank = MessageBuilder::exec("   ").cmd(&["ls"]).build();
    let err = ExecutionRequest::from_message(CallVariant::ExecInRunning, &blank).unwrap_err();
    assert!(matches!(err, ExecmuxError::InvalidRequest(_)), "got {err:?}");
}

#[test]
fn run_in_needs_a_command_but_exec_does_not() -> TestResult {
    let msg = MessageBuilder::runin("db").build();
    let err = ExecutionRequest::from_message(CallVariant::RunInStopped, &msg).unwrap_err();
    assert!(matches!(err, ExecmuxError::InvalidRequest(_)), "got {err:?}");
    assert!(err.to_string().contains("Usage: runin"), "got {err}");

    let msg = MessageBuilder::exec("web").build();
    let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg)?;
    assert!(req.command.is_empty());
    Ok(())
}

#[test]
fn positional_args_are_used_only_without_cmd() -> TestResult {
    let msg = MessageBuilder::exec("web").arg("ls").arg("-la").build();
    let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg)?;
    assert_eq!(req.command, vec!["ls".to_string(), "-la".to_string()]);

    let msg = MessageBuilder::exec("web")
        .arg("ignored")
        .cmd(&["uptime"])
        .build();
    let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg)?;
    assert_eq!(req.command, vec!["uptime".to_string()]);
    Ok(())
}

#[test]
fn non_json_cmd_is_a_single_token() -> TestResult {
    let msg = MessageBuilder::exec("web").env(fields::CMD, "/bin/true").build();
    let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg)?;
    assert_eq!(req.command, vec!["/bin/true".to_string()]);
    Ok(())
}

#[test]
fn detach_drops_every_attachment() -> TestResult {
    let msg = MessageBuilder::exec("web")
        .cmd(&["sleep", "10"])
        .attach(true)
        .flag(fields::DETACH, true)
        .build();
    let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg)?;

    assert!(req.detach);
    assert!(!req.attaches_anything());
    Ok(())
}

#[test]
fn boolean_fields_follow_env_conventions() {
    let mut msg = DispatchMessage::new("exec");
    for (value, expected) in [
        ("1", true),
        ("yes", true),
        ("true", true),
        ("anything", true),
        ("", false),
        ("0", false),
        ("no", false),
        (" FALSE\t", false),
        ("None", false),
    ] {
        msg.setenv(fields::TTY, value);
        assert_eq!(msg.getenv_bool(fields::TTY), expected, "value {value:?}");
    }
    assert!(!msg.getenv_bool("Missing"));
}

#[test]
fn flags_attach_outputs_and_stdin_only_when_interactive() -> TestResult {
    let req = ExecutionRequest::from_flags(CallVariant::ExecInRunning, &flags("web", &["ls"]))?;
    assert!(req.attach_stdout && req.attach_stderr);
    assert!(!req.attach_stdin);

    let mut interactive = flags("web", &["sh"]);
    interactive.interactive = true;
    interactive.tty = true;
    let req = ExecutionRequest::from_flags(CallVariant::ExecInRunning, &interactive)?;
    assert!(req.attach_stdin && req.tty);

    let mut detached = flags("web", &["sh"]);
    detached.interactive = true;
    detached.detach = true;
    let req = ExecutionRequest::from_flags(CallVariant::ExecInRunning, &detached)?;
    assert!(!req.attaches_anything());
    Ok(())
}

#[test]
fn flags_reject_empty_container() {
    let err = ExecutionRequest::from_flags(CallVariant::RunInStopped, &flags(" ", &["ls"]))
        .unwrap_err();
    assert!(matches!(err, ExecmuxError::InvalidRequest(_)), "got {err:?}");
}

#[test]
fn request_survives_message_encoding() -> TestResult {
    let mut f = flags("db", &["sh", "-c", "echo \"quoted\" [x]"]);
    f.user = Some("0".to_string());
    f.hostname = Some("db-host".to_string());
    f.privileged = true;
    f.interactive = true;

    let req = ExecutionRequest::from_flags(CallVariant::RunInStopped, &f)?;
    let msg = req.to_message();
    assert_eq!(msg.name, "runin");

    let decoded = ExecutionRequest::from_message(CallVariant::RunInStopped, &msg)?;
    assert_eq!(decoded, req);
    Ok(())
}

#[test]
fn response_reflects_outcome() {
    let ok = DispatchResponse::from_result(&Ok(CallOutcome::Exited(3)));
    assert!(ok.is_ok());
    assert_eq!(ok.exit_code, Some(3));

    let err = DispatchResponse::from_result(&Err(ExecmuxError::ContainerNotFound(
        "ghost".to_string(),
    )));
    assert!(!err.is_ok());
    assert_eq!(err.error.as_deref(), Some("No such container: ghost"));
}

proptest! {
    #[test]
    fn detach_never_attaches(
        stdin in any::<bool>(),
        stdout in any::<bool>(),
        stderr in any::<bool>(),
        detach in any::<bool>(),
    ) {
        let msg = MessageBuilder::exec("web")
            .cmd(&["true"])
            .flag(fields::ATTACH_STDIN, stdin)
            .flag(fields::ATTACH_STDOUT, stdout)
            .flag(fields::ATTACH_STDERR, stderr)
            .flag(fields::DETACH, detach)
            .build();
        let req = ExecutionRequest::from_message(CallVariant::ExecInRunning, &msg).unwrap();

        if detach {
            prop_assert!(!req.attaches_anything());
        } else {
            prop_assert_eq!(req.attach_stdin, stdin);
            prop_assert_eq!(req.attach_stdout, stdout);
            prop_assert_eq!(req.attach_stderr, stderr);
        }
    }
}
