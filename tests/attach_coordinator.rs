// tests/attach_coordinator.rs

mod common;
use crate::common::{init_tracing, with_timeout, TestResult};

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use execmux::attach::{attach, ClientStreams};
use execmux::errors::{AttachError, StreamKind};
use execmux::request::fields;
use execmux::stdio::{OutputSink, StdioChannel, DEFAULT_QUEUE_CAPACITY};
use execmux_test_utils::builders::MessageBuilder;
use execmux_test_utils::io::{reader, FailingReader, IdleReader, SharedBuf, StalledWriter};

#[tokio::test]
async fn outputs_are_released_when_the_channel_closes_them() -> TestResult {
    init_tracing();

    let request = MessageBuilder::exec("web").cmd(&["ls"]).attach(false).request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));
    let out = SharedBuf::new();
    let err = SharedBuf::new();

    let done = attach(
        Arc::clone(&channel),
        &request,
        ClientStreams::none()
            .with_stdout(out.boxed())
            .with_stderr(err.boxed()),
        CancellationToken::new(),
    );
    assert_eq!(channel.stdout().subscriber_count(), 1);
    assert_eq!(channel.stderr().subscriber_count(), 1);

    let mut pipes = channel.backend_pipes();
    pipes.stdout.write_all(b"listing").await?;
    pipes.stderr.write_all(b"warning").await?;
    channel.close_outputs();

    with_timeout(done).await??;
    assert_eq!(out.text(), "listing");
    assert_eq!(err.text(), "warning");
    Ok(())
}

#[tokio::test]
async fn unrequested_streams_are_not_subscribed() -> TestResult {
    let request = MessageBuilder::exec("web")
        .cmd(&["ls"])
        .flag(fields::ATTACH_STDOUT, true)
        .request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));

    let done = attach(
        Arc::clone(&channel),
        &request,
        ClientStreams::none()
            .with_stdout(SharedBuf::new().boxed())
            .with_stderr(SharedBuf::new().boxed()),
        CancellationToken::new(),
    );
    assert_eq!(channel.stdout().subscriber_count(), 1);
    assert_eq!(channel.stderr().subscriber_count(), 0);

    channel.close_outputs();
    with_timeout(done).await??;
    Ok(())
}

#[tokio::test]
async fn client_input_reaches_the_pipe_and_ends_it() -> TestResult {
    let request = MessageBuilder::exec("web").cmd(&["cat"]).attach(true).request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));
    let mut backend_in = channel.backend_pipes().stdin.expect("stdin pipe");

    let done = attach(
        Arc::clone(&channel),
        &request,
        ClientStreams::none().with_stdin(reader(b"typed input")),
        CancellationToken::new(),
    );

    let mut got = String::new();
    with_timeout(backend_in.read_to_string(&mut got)).await?;
    assert_eq!(got, "typed input");

    // Input alone is done once it hits end-of-input.
    with_timeout(done).await??;
    Ok(())
}

#[tokio::test]
async fn input_read_error_is_an_attach_failure() -> TestResult {
    let request = MessageBuilder::exec("web").cmd(&["cat"]).attach(true).request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));
    let out = SharedBuf::new();

    let done = attach(
        Arc::clone(&channel),
        &request,
        ClientStreams::none()
            .with_stdin(FailingReader::boxed())
            .with_stdout(out.boxed()),
        CancellationToken::new(),
    );

    let err = with_timeout(done).await?.unwrap_err();
    assert!(matches!(err, AttachError::Copy { .. }), "got {err:?}");
    assert_eq!(err.stream(), Some(StreamKind::Stdin));
    // The failing side released its output subscription too.
    assert_eq!(channel.stdout().subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn stalled_client_output_is_an_attach_failure() -> TestResult {
    let request = MessageBuilder::exec("web").cmd(&["yes"]).attach(false).request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));

    let done = attach(
        Arc::clone(&channel),
        &request,
        ClientStreams::none().with_stdout(StalledWriter::boxed()),
        CancellationToken::new(),
    );

    let mut pipes = channel.backend_pipes();
    for _ in 0..DEFAULT_QUEUE_CAPACITY + 2 {
        pipes.stdout.write_all(b"y\n").await?;
    }

    let err = with_timeout(done).await?.unwrap_err();
    assert_eq!(err.stream(), Some(StreamKind::Stdout));
    assert_eq!(channel.stdout().subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn cancel_releases_an_idle_client() -> TestResult {
    let request = MessageBuilder::exec("web").cmd(&["sh"]).attach(true).request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));
    let cancel = CancellationToken::new();

    let done = attach(
        Arc::clone(&channel),
        &request,
        ClientStreams::none()
            .with_stdin(IdleReader::boxed())
            .with_stdout(SharedBuf::new().boxed()),
        cancel.clone(),
    );
    assert_eq!(channel.stdout().subscriber_count(), 1);

    cancel.cancel();
    with_timeout(done).await??;
    assert_eq!(channel.stdout().subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn nothing_attached_finishes_immediately() -> TestResult {
    let request = MessageBuilder::exec("web")
        .cmd(&["true"])
        .flag(fields::DETACH, true)
        .request();
    let channel = Arc::new(StdioChannel::open(&request, 1024));

    let done = attach(
        channel,
        &request,
        ClientStreams::none().with_stdout(SharedBuf::new().boxed()),
        CancellationToken::new(),
    );
    with_timeout(done).await??;
    Ok(())
}
