// tests/config_loading.rs

mod common;
use crate::common::TestResult;

use std::io::Write;
use std::time::Duration;

use execmux::config::{load_and_validate, validate_config};
use execmux::container::{Container, ContainerRegistry, ContainerStore};
use execmux::engine::ServiceOptions;
use execmux::errors::ExecmuxError;
use execmux::types::{parse_duration, BackendKind};
use execmux_test_utils::builders::ConfigFileBuilder;

fn write_config(contents: &str) -> Result<tempfile::NamedTempFile, std::io::Error> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn full_config_loads() -> TestResult {
    let file = write_config(
        r#"
[service]
drain_timeout = "250ms"
stdin_buffer = 4096

[backend]
kind = "nsenter"
nsenter_path = "/usr/bin/nsenter"
default_shell = "/bin/sh"

[container.web]
running = true
pid = 4242
hostname = "web-1"

[container.db]
"#,
    )?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.drain_timeout(), Duration::from_millis(250));
    assert_eq!(cfg.stdin_buffer(), 4096);
    assert_eq!(cfg.backend().kind, BackendKind::Nsenter);
    assert_eq!(cfg.backend().default_shell.as_deref(), Some("/bin/sh"));

    let web = cfg.container("web").expect("web configured");
    assert!(web.running);
    assert_eq!(web.pid, Some(4242));
    assert!(!cfg.container("db").expect("db configured").running);

    let options = ServiceOptions::from_config(&cfg);
    assert_eq!(options.drain_timeout, Duration::from_millis(250));
    assert_eq!(options.stdin_buffer, 4096);

    let registry = ContainerRegistry::from_config(&cfg);
    assert_eq!(registry.ids(), vec!["db".to_string(), "web".to_string()]);
    let web = registry.get("web").expect("web registered");
    assert!(web.is_running());
    assert_eq!(web.init_pid(), Some(4242));
    assert_eq!(web.hostname(), Some("web-1"));
    Ok(())
}

#[test]
fn defaults_apply_to_missing_sections() -> TestResult {
    let file = write_config("[container.only]\nrunning = true\n")?;
    let cfg = load_and_validate(file.path())?;

    assert_eq!(cfg.drain_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.stdin_buffer(), 64 * 1024);
    assert_eq!(cfg.backend().kind, BackendKind::Host);
    assert_eq!(cfg.backend().nsenter_path, "nsenter");
    Ok(())
}

#[test]
fn config_without_containers_is_rejected() {
    let raw = ConfigFileBuilder::new().raw();
    let err = validate_config(&raw).unwrap_err();
    assert!(matches!(err, ExecmuxError::ConfigError(_)), "got {err:?}");
}

#[test]
fn bad_duration_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_container("web", true)
        .with_drain_timeout("soon")
        .raw();
    assert!(validate_config(&raw).is_err());
}

#[test]
fn oversized_duration_is_a_config_error_not_a_panic() -> TestResult {
    let file = write_config(
        "[service]\ndrain_timeout = \"6000000000000000h\"\n[container.web]\n",
    )?;
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, ExecmuxError::ConfigError(_)), "got {err:?}");
    assert!(err.to_string().contains("too large"), "got {err}");

    assert!(parse_duration("307445734561825861m").is_err());
    assert_eq!(
        parse_duration("5124095576030431h")?,
        Duration::from_secs(5_124_095_576_030_431 * 3600)
    );
    Ok(())
}

#[test]
fn zero_stdin_buffer_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_container("web", true)
        .with_stdin_buffer(0)
        .raw();
    assert!(validate_config(&raw).is_err());
}

#[test]
fn nsenter_needs_pids_for_running_containers() {
    let missing = ConfigFileBuilder::new()
        .with_container("web", true)
        .with_backend(BackendKind::Nsenter)
        .raw();
    assert!(validate_config(&missing).is_err());

    let present = ConfigFileBuilder::new()
        .with_container_pid("web", true, 1)
        .with_container("stopped", false)
        .with_backend(BackendKind::Nsenter)
        .raw();
    assert!(validate_config(&present).is_ok());
}

#[test]
fn invalid_toml_surfaces_a_toml_error() -> TestResult {
    let file = write_config("[container.web\nrunning = true")?;
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, ExecmuxError::TomlError(_)), "got {err:?}");
    Ok(())
}

#[test]
fn unknown_backend_kind_is_a_toml_error() -> TestResult {
    let file = write_config("[backend]\nkind = \"docker\"\n[container.web]\n")?;
    assert!(load_and_validate(file.path()).is_err());
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here/Execmux.toml").unwrap_err();
    assert!(matches!(err, ExecmuxError::IoError(_)), "got {err:?}");
}

#[test]
fn registry_tracks_running_state_changes() {
    let cfg = ConfigFileBuilder::new().with_container("web", false).build();
    let registry = ContainerRegistry::from_config(&cfg);

    assert!(!registry.get("web").expect("web").is_running());
    assert!(registry.set_running("web", true));
    assert!(registry.get("web").expect("web").is_running());
    assert!(!registry.set_running("ghost", true));
    assert!(registry.get("ghost").is_none());
}
