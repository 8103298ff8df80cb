// src/lib.rs

pub mod attach;
pub mod cli;
pub mod config;
pub mod container;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod request;
pub mod stdio;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::attach::ClientStreams;
use crate::cli::{CliArgs, Command};
use crate::config::{default_config_path, load_and_validate, ConfigFile};
use crate::container::{ContainerRegistry, ContainerStore};
use crate::engine::{ExecService, ServiceOptions};
use crate::exec::{HostProcessBackend, ProcessDescriptor};
use crate::request::ExecutionRequest;
use crate::types::{CallOutcome, CallVariant};

/// High-level entry point used by `main.rs`. Returns the exit code the
/// process should end with.
///
/// This wires together:
/// - config loading
/// - the container registry and the process backend
/// - the exec service, fed with our own stdio
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)?;
    debug!(path = %config_path.display(), "config loaded");

    let (variant, flags) = match &args.command {
        Command::Containers => {
            print_containers(&cfg);
            return Ok(0);
        }
        Command::Exec(flags) => (CallVariant::ExecInRunning, flags),
        Command::RunIn(flags) => (CallVariant::RunInStopped, flags),
    };

    let request = ExecutionRequest::from_flags(variant, flags)?;

    if args.dry_run {
        print_dry_run(&cfg, &request);
        return Ok(0);
    }

    let registry = Arc::new(ContainerRegistry::from_config(&cfg));
    let backend = Arc::new(HostProcessBackend::from_config(cfg.backend()));
    let service = ExecService::new(registry, backend, ServiceOptions::from_config(&cfg));

    // Ctrl-C → cancel the call.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; cancelling call");
            cancel.cancel();
        });
    }

    let msg = request.to_message();
    let mut call = service.spawn_dispatch(&msg, ClientStreams::process_stdio(), cancel)?;
    let outcome = call.outcome().await;

    // Let relayed output reach our stdout before the process exits.
    if !matches!(outcome, Ok(CallOutcome::Detached { .. }))
        && tokio::time::timeout(cfg.drain_timeout(), call.closed())
            .await
            .is_err()
    {
        debug!("gave up waiting for the call to wind down");
    }
    let outcome = outcome?;

    if let CallOutcome::Detached { pid } = outcome {
        match pid {
            Some(pid) => println!("{pid}"),
            None => println!("started"),
        }
    }

    Ok(outcome.exit_code())
}

fn print_containers(cfg: &ConfigFile) {
    let registry = ContainerRegistry::from_config(cfg);
    for id in registry.ids() {
        let Some(container) = registry.get(&id) else {
            continue;
        };
        let state = if container.is_running() {
            "running"
        } else {
            "stopped"
        };
        let pid = container
            .init_pid()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let hostname = container.hostname().unwrap_or("-");
        println!("{id}\t{state}\tpid={pid}\thostname={hostname}");
    }
}

/// Print the resolved request and process without starting anything.
fn print_dry_run(cfg: &ConfigFile, request: &ExecutionRequest) {
    let descriptor = ProcessDescriptor::from_request(request);

    println!("execmux dry-run");
    println!("  backend.kind = {:?}", cfg.backend().kind);
    println!("  service.drain_timeout = {:?}", cfg.drain_timeout());
    println!("  service.stdin_buffer = {}", cfg.stdin_buffer());
    println!();

    println!("{} {}", request.variant, request.container);
    match cfg.container(&request.container) {
        Some(section) => println!(
            "  container: {}",
            if section.running { "running" } else { "stopped" }
        ),
        None => println!("  container: not configured"),
    }
    println!("  entrypoint: {}", descriptor.entrypoint);
    if !descriptor.arguments.is_empty() {
        println!("  args: {:?}", descriptor.arguments);
    }
    if let Some(user) = &descriptor.user {
        println!("  user: {user}");
    }
    if let Some(hostname) = &request.hostname {
        println!("  hostname: {hostname}");
    }
    if descriptor.privileged {
        println!("  privileged: true");
    }
    if descriptor.tty {
        println!("  tty: true");
    }
    if request.detach {
        println!("  detach: true");
    } else {
        println!(
            "  attach: stdin={} stdout={} stderr={}",
            request.attach_stdin, request.attach_stdout, request.attach_stderr
        );
    }

    debug!("dry-run complete (no execution)");
}
