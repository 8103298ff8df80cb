// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ExecmuxError, Result};
use crate::types::{parse_duration, BackendKind};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ExecmuxError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let drain_timeout =
            parse_duration(&raw.service.drain_timeout).map_err(ExecmuxError::ConfigError)?;
        Ok(ConfigFile::new_unchecked(
            raw.service,
            raw.backend,
            raw.container,
            drain_timeout,
        ))
    }
}

/// Run every check against an unvalidated config.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_containers(cfg)?;
    validate_service(cfg)?;
    validate_container_ids(cfg)?;
    validate_backend(cfg)?;
    Ok(())
}

fn ensure_has_containers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.container.is_empty() {
        return Err(ExecmuxError::ConfigError(
            "config must contain at least one [container.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_service(cfg: &RawConfigFile) -> Result<()> {
    if cfg.service.stdin_buffer == 0 {
        return Err(ExecmuxError::ConfigError(
            "[service].stdin_buffer must be >= 1 (got 0)".to_string(),
        ));
    }

    parse_duration(&cfg.service.drain_timeout).map_err(|e| {
        ExecmuxError::ConfigError(format!("[service].drain_timeout: {e}"))
    })?;

    Ok(())
}

fn validate_container_ids(cfg: &RawConfigFile) -> Result<()> {
    for id in cfg.container.keys() {
        if id.trim().is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ExecmuxError::ConfigError(format!(
                "container id '{id}' must be non-empty and contain no whitespace"
            )));
        }
    }
    Ok(())
}

fn validate_backend(cfg: &RawConfigFile) -> Result<()> {
    if cfg.backend.kind != BackendKind::Nsenter {
        return Ok(());
    }

    if cfg.backend.nsenter_path.trim().is_empty() {
        return Err(ExecmuxError::ConfigError(
            "[backend].nsenter_path must not be empty".to_string(),
        ));
    }

    for (id, container) in cfg.container.iter() {
        if container.running && container.pid.is_none() {
            return Err(ExecmuxError::ConfigError(format!(
                "container '{id}' is running but has no pid; the nsenter backend needs one"
            )));
        }
    }
    Ok(())
}
