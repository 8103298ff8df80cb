// tests/host_backend.rs
//
// Runs real processes on the host through the direct launch mode.
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout, TestResult};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use execmux::attach::ClientStreams;
use execmux::container::{ContainerRecord, ContainerRegistry};
use execmux::engine::{ExecService, ServiceOptions};
use execmux::exec::{ExecBackend, HostProcessBackend, ProcessDescriptor, ProcessInfo};
use execmux::stdio::{OutputSink, StdioChannel};
use execmux::types::CallOutcome;
use execmux_test_utils::builders::MessageBuilder;
use execmux_test_utils::io::{reader, SharedBuf};

fn descriptor(entrypoint: &str, args: &[&str]) -> ProcessDescriptor {
    ProcessDescriptor {
        entrypoint: entrypoint.to_string(),
        arguments: args.iter().map(|s| s.to_string()).collect(),
        user: None,
        privileged: false,
        tty: false,
        detach: false,
    }
}

fn service(backend: HostProcessBackend) -> ExecService {
    let registry = Arc::new(ContainerRegistry::new());
    registry.insert(ContainerRecord::new("host", true));
    ExecService::new(registry, Arc::new(backend), ServiceOptions::default())
}

#[tokio::test]
async fn runs_a_process_and_relays_its_output() -> TestResult {
    init_tracing();

    let backend = HostProcessBackend::direct();
    let container = ContainerRecord::new("host", true);
    let channel = StdioChannel::with_stdin(false, 1024);
    let out = SharedBuf::new();
    let err = SharedBuf::new();
    let out_sub = channel.stdout().subscribe(out.boxed());
    let err_sub = channel.stderr().subscribe(err.boxed());

    let (started_tx, started_rx) = oneshot::channel();
    let process = descriptor("sh", &["-c", "echo out; echo err >&2; exit 7"]);
    let code = with_timeout(backend.execute(
        &container,
        &process,
        channel.backend_pipes(),
        Box::new(move |info: ProcessInfo| {
            let _ = started_tx.send(info);
        }),
    ))
    .await?;

    assert_eq!(code, 7);
    let info = started_rx.await?;
    assert!(info.pid.is_some());
    assert_eq!(backend.running_count(), 0);

    channel.close();
    with_timeout(out_sub.finished()).await?;
    with_timeout(err_sub.finished()).await?;
    assert_eq!(out.text(), "out\n");
    assert_eq!(err.text(), "err\n");
    Ok(())
}

#[tokio::test]
async fn background_descendant_does_not_hold_up_the_exit() -> TestResult {
    let backend = HostProcessBackend::direct().with_output_grace(Duration::from_millis(200));
    let container = ContainerRecord::new("host", true);
    let channel = StdioChannel::with_stdin(false, 1024);
    let out = SharedBuf::new();
    let out_sub = channel.stdout().subscribe(out.boxed());

    // The backgrounded sleep inherits stdout and keeps it open.
    let began = Instant::now();
    let code = with_timeout(backend.execute(
        &container,
        &descriptor("sh", &["-c", "echo main; sleep 3 &"]),
        channel.backend_pipes(),
        Box::new(|_: ProcessInfo| {}),
    ))
    .await?;

    assert_eq!(code, 0);
    assert!(began.elapsed() < Duration::from_secs(2), "took {:?}", began.elapsed());
    assert_eq!(backend.running_count(), 0);

    channel.close();
    with_timeout(out_sub.finished()).await?;
    assert_eq!(out.text(), "main\n");
    Ok(())
}

#[test]
fn detached_process_outlives_its_caller() -> TestResult {
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("written");
    let script = format!("sleep 0.3; echo hello && touch '{}'", marker.display());

    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.spawn(async move {
        let backend = HostProcessBackend::direct();
        let container = ContainerRecord::new("host", true);
        let channel = StdioChannel::with_stdin(false, 1024);
        let mut process = descriptor("sh", &["-c", script.as_str()]);
        process.detach = true;

        let _ = backend
            .execute(
                &container,
                &process,
                channel.backend_pipes(),
                Box::new(move |info: ProcessInfo| {
                    let _ = started_tx.send(info);
                }),
            )
            .await;
    });

    let info = started_rx.recv_timeout(Duration::from_secs(5))?;
    assert!(info.pid.is_some());

    // The caller goes away as soon as the process has started, taking every
    // task and pipe end it owned with it.
    rt.shutdown_background();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !marker.exists() {
        assert!(
            Instant::now() < deadline,
            "detached process did not finish writing after its caller exited"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

#[tokio::test]
async fn missing_binary_fails_before_start() {
    let backend = HostProcessBackend::direct();
    let container = ContainerRecord::new("host", true);
    let channel = StdioChannel::with_stdin(false, 1024);

    let res = backend
        .execute(
            &container,
            &descriptor("/no/such/binary-execmux", &[]),
            channel.backend_pipes(),
            Box::new(|_: ProcessInfo| panic!("must not report a start")),
        )
        .await;
    assert!(res.is_err());
}

#[tokio::test]
async fn empty_command_needs_a_default_shell() -> TestResult {
    let container = ContainerRecord::new("host", true);

    let bare = HostProcessBackend::direct();
    let channel = StdioChannel::with_stdin(false, 1024);
    let res = bare
        .execute(
            &container,
            &descriptor("", &[]),
            channel.backend_pipes(),
            Box::new(|_: ProcessInfo| {}),
        )
        .await;
    assert!(res.is_err());

    // With stdin not attached the shell reads end-of-input and exits 0.
    let with_shell = HostProcessBackend::direct().with_default_shell("sh");
    let channel = StdioChannel::with_stdin(false, 1024);
    let code = with_timeout(with_shell.execute(
        &container,
        &descriptor("", &[]),
        channel.backend_pipes(),
        Box::new(|_: ProcessInfo| {}),
    ))
    .await?;
    assert_eq!(code, 0);
    Ok(())
}

#[tokio::test]
async fn direct_mode_refuses_to_switch_user() {
    let backend = HostProcessBackend::direct();
    let container = ContainerRecord::new("host", true);
    let channel = StdioChannel::with_stdin(false, 1024);
    let mut process = descriptor("true", &[]);
    process.user = Some("1000".to_string());

    let res = backend
        .execute(
            &container,
            &process,
            channel.backend_pipes(),
            Box::new(|_: ProcessInfo| {}),
        )
        .await;
    let err = res.unwrap_err();
    assert!(err.to_string().contains("nsenter"), "got {err}");
}

#[tokio::test]
async fn nsenter_mode_needs_an_init_pid() {
    let backend = HostProcessBackend::nsenter("nsenter");
    let container = ContainerRecord::new("host", true);
    let channel = StdioChannel::with_stdin(false, 1024);

    let res = backend
        .execute(
            &container,
            &descriptor("true", &[]),
            channel.backend_pipes(),
            Box::new(|_: ProcessInfo| {}),
        )
        .await;
    assert!(res.is_err());
}

#[tokio::test]
async fn terminate_without_pid_is_an_error() {
    let backend = HostProcessBackend::direct();
    let container = ContainerRecord::new("host", true);
    assert!(backend.terminate(&container, ProcessInfo { pid: None }).is_err());
    // Unknown pids are not an error; the process may have exited already.
    assert!(backend.terminate(&container, ProcessInfo { pid: Some(1) }).is_ok());
}

#[tokio::test]
async fn service_relays_stdin_through_a_real_process() -> TestResult {
    let svc = service(HostProcessBackend::direct());
    let out = SharedBuf::new();
    let request = MessageBuilder::exec("host")
        .cmd(&["cat"])
        .attach(true)
        .request();

    let mut call = svc.spawn_call(
        request,
        ClientStreams::none()
            .with_stdin(reader(b"through cat\n"))
            .with_stdout(out.boxed()),
        CancellationToken::new(),
    )?;

    assert_eq!(with_timeout(call.outcome()).await?, CallOutcome::Exited(0));
    with_timeout(call.closed()).await;
    assert_eq!(out.text(), "through cat\n");
    Ok(())
}

#[tokio::test]
async fn cancel_kills_a_real_process() -> TestResult {
    let svc = service(HostProcessBackend::direct());
    let request = MessageBuilder::exec("host")
        .cmd(&["sleep", "30"])
        .attach(false)
        .request();
    let cancel = CancellationToken::new();

    let mut call = svc.spawn_call(request, ClientStreams::none(), cancel.clone())?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    assert!(with_timeout(call.outcome()).await.is_err());
    with_timeout(call.closed()).await;
    Ok(())
}
