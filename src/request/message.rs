// src/request/message.rs

//! Command-dispatch message: a job name, positional arguments and a flat
//! string environment of named fields.
//!
//! Typed getters follow the job-environment conventions front ends already
//! speak:
//! - booleans are false for `""`, `"0"`, `"no"`, `"false"` and `"none"`
//!   (case-insensitive, surrounding blanks ignored) and true otherwise;
//! - lists are JSON arrays of strings; a value that is not a JSON array is
//!   taken as a single-element list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::CallOutcome;

/// Inbound request for the exec service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// Job name, e.g. `"exec"` or `"runin"`.
    pub name: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DispatchMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn getenv(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn getenv_bool(&self, key: &str) -> bool {
        let value = self.getenv(key).unwrap_or_default();
        let value = value.trim_matches([' ', '\t']).to_lowercase();
        !matches!(value.as_str(), "" | "0" | "no" | "false" | "none")
    }

    /// Returns `None` when the field is absent or empty.
    pub fn getenv_list(&self, key: &str) -> Option<Vec<String>> {
        let raw = self.getenv(key).filter(|s| !s.is_empty())?;
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(list) => Some(list),
            Err(_) => Some(vec![raw.to_string()]),
        }
    }

    pub fn setenv(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    pub fn setenv_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.setenv(key, if value { "1" } else { "0" })
    }

    pub fn setenv_list(&mut self, key: &str, values: &[String]) -> &mut Self {
        // Serialising a slice of strings cannot fail.
        let encoded = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string());
        self.setenv(key, encoded)
    }
}

/// Reply to a dispatch message: success with no payload, or a textual error.
///
/// `exit_code` is carried alongside success so CLI front ends can mirror the
/// in-container process's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl DispatchResponse {
    pub fn from_result(result: &Result<CallOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                error: None,
                exit_code: Some(outcome.exit_code()),
            },
            Err(err) => Self {
                error: Some(err.to_string()),
                exit_code: None,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
