// Error taxonomy for the control-node integration layer

use std::collections::BTreeMap;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;
use serde::Serialize;
use thiserror::Error;

use super::messages::MessageCatalog;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// All failures the core can classify.
///
/// A control node that did not answer is not listed here: remote
/// operations report it as an absent result instead.
#[derive(Debug, Error)]
pub enum ControlNodeError {
    /// Input violates an invariant (bad path string, duplicate path)
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Referenced path or host does not exist or is not visible to the actor
    #[error("not found")]
    NotFound,

    /// The remote operation ran and reported a problem
    #[error("remote execution failed: {message}")]
    Execution { message: String },

    /// The external task scheduler cannot accept work
    #[error("task scheduler unavailable: {message}")]
    SchedulerUnavailable { message: String },

    /// Path store I/O or snapshot errors
    #[error("storage error: {message}")]
    Storage {
        message: String,
        path: Option<PathBuf>,
    },

    /// Unreadable or invalid configuration file
    #[error("configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },
}

impl ControlNodeError {
    /// Single field-level validation failure
    pub fn field(field: &str, key: &str) -> Self {
        ControlNodeError::Validation(ValidationErrors::new().with_field_error(field, key))
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ControlNodeError::Execution {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        ControlNodeError::Storage {
            message: message.into(),
            path,
        }
    }
}

impl From<ValidationErrors> for ControlNodeError {
    fn from(errors: ValidationErrors) -> Self {
        ControlNodeError::Validation(errors)
    }
}

/// Validation failures, kept as message-catalog keys until the boundary
/// localizes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub messages: Vec<String>,
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        ValidationErrors::default()
    }

    pub fn with_field_error(mut self, field: &str, key: &str) -> Self {
        self.add_field_error(field, key);
        self
    }

    pub fn add_field_error(&mut self, field: &str, key: &str) {
        self.field_errors
            .entry(field.to_string())
            .or_default()
            .push(key.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.field_errors.is_empty()
    }

    /// Check whether a field carries the given message key
    pub fn has_field_error(&self, field: &str, key: &str) -> bool {
        self.field_errors
            .get(field)
            .map(|keys| keys.iter().any(|k| k == key))
            .unwrap_or(false)
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> Result<(), ControlNodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ControlNodeError::Validation(self))
        }
    }

    /// Resolve every key through the catalog
    pub fn localize(&self, catalog: &MessageCatalog) -> ValidationErrors {
        ValidationErrors {
            messages: self.messages.iter().map(|k| catalog.get(k, &[])).collect(),
            field_errors: self
                .field_errors
                .iter()
                .map(|(field, keys)| {
                    (
                        field.clone(),
                        keys.iter().map(|k| catalog.get(k, &[])).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let catalog = MessageCatalog::defaults();
        let mut parts: Vec<String> = self.messages.iter().map(|k| catalog.get(k, &[])).collect();
        for (field, keys) in &self.field_errors {
            for key in keys {
                parts.push(format!("{}: {}", field, catalog.get(key, &[])));
            }
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Human-readable rendering for terminal output
pub fn render_error(error: &ControlNodeError) -> String {
    if !should_use_colors() {
        colored::control::set_override(false);
    }

    let mut out = String::new();

    match error {
        ControlNodeError::Validation(errors) => {
            out.push_str(&format!("{}: invalid input\n", "VALIDATION ERROR".red().bold()));
            let catalog = MessageCatalog::defaults();
            for key in &errors.messages {
                out.push_str(&format!("  {}\n", catalog.get(key, &[])));
            }
            for (field, keys) in &errors.field_errors {
                for key in keys {
                    out.push_str(&format!(
                        "  {} {}\n",
                        format!("{}:", field).dimmed(),
                        catalog.get(key, &[])
                    ));
                }
            }
        }
        ControlNodeError::NotFound => {
            out.push_str(&format!("{}: not found\n", "ERROR".red().bold()));
        }
        ControlNodeError::Execution { message } => {
            out.push_str(&format!("{}: {}\n", "REMOTE ERROR".red().bold(), message));
        }
        ControlNodeError::SchedulerUnavailable { message } => {
            out.push_str(&format!("{}: {}\n", "SCHEDULER DOWN".red().bold(), message));
        }
        ControlNodeError::Storage { message, path } | ControlNodeError::Config { message, path } => {
            let label = if matches!(error, ControlNodeError::Storage { .. }) {
                "STORAGE ERROR"
            } else {
                "CONFIG ERROR"
            };
            out.push_str(&format!("{}: {}\n", label.red().bold(), message));
            if let Some(path) = path {
                out.push_str(&format!("  {} {}\n", "Path:".dimmed(), path.display()));
            }
        }
    }

    if let Some(suggestion) = suggest_fix(error) {
        out.push('\n');
        out.push_str(&format!("{}: {}\n", "Hint".yellow().bold(), suggestion));
    }

    out
}

/// Suggest common fixes for errors
pub fn suggest_fix(error: &ControlNodeError) -> Option<String> {
    match error {
        ControlNodeError::Execution { message } => {
            if message.contains("command not found") || message.contains("No such file") {
                Some("Check that Ansible is installed on the control node and the path exists".to_string())
            } else if message.contains("Permission denied") {
                Some("Check file permissions for the remote user".to_string())
            } else {
                None
            }
        }
        ControlNodeError::SchedulerUnavailable { .. } => {
            Some("The task scheduler is down, try again later".to_string())
        }
        ControlNodeError::Storage { .. } => {
            Some("The path store may be corrupted or not writable".to_string())
        }
        ControlNodeError::Config { .. } => {
            Some("Check YAML syntax and structure of the configuration file".to_string())
        }
        _ => None,
    }
}
