// Boundary payloads: success data or a classified failure

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::errors::ControlNodeError;
use super::messages::{self, MessageCatalog};

/// Failure classes the boundary can present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    NotFound,
    /// Soft: the control node did not answer, retry later
    ControlNodeNotResponding,
    ExecutionFailed,
    SchedulerDown,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::ControlNodeNotResponding => "control_node_not_responding",
            FailureKind::ExecutionFailed => "execution_failed",
            FailureKind::SchedulerDown => "scheduler_down",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Localized failure payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            messages: vec![message.into()],
            field_errors: BTreeMap::new(),
        }
    }

    /// The advisory shown when a control node did not answer
    pub fn not_responding(catalog: &MessageCatalog) -> Self {
        Failure::new(
            FailureKind::ControlNodeNotResponding,
            catalog.get(messages::CONTROL_NODE_NOT_RESPONDING, &[]),
        )
    }

    /// Classify a core error, localizing every message through `catalog`
    pub fn from_error(error: &ControlNodeError, catalog: &MessageCatalog) -> Self {
        match error {
            ControlNodeError::Validation(errors) => {
                let localized = errors.localize(catalog);
                Failure {
                    kind: FailureKind::Validation,
                    messages: localized.messages,
                    field_errors: localized.field_errors,
                }
            }
            ControlNodeError::NotFound => {
                Failure::new(FailureKind::NotFound, catalog.get(messages::NOT_FOUND, &[]))
            }
            ControlNodeError::Execution { message } => Failure::new(
                FailureKind::ExecutionFailed,
                catalog.get(messages::REMOTE_ERROR, &[message.as_str()]),
            ),
            ControlNodeError::SchedulerUnavailable { .. } => Failure::new(
                FailureKind::SchedulerDown,
                catalog.get(messages::SCHEDULER_DOWN, &[]),
            ),
            // Store and config details stay in the logs
            ControlNodeError::Storage { .. } | ControlNodeError::Config { .. } => Failure::new(
                FailureKind::Internal,
                catalog.get(messages::INTERNAL_ERROR, &[]),
            ),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.messages.clone();
        for (field, field_messages) in &self.field_errors {
            for message in field_messages {
                parts.push(format!("{}: {}", field, message));
            }
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// What every boundary operation returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultJson<T> {
    Success { data: T },
    Failure(Failure),
}

impl<T> ResultJson<T> {
    pub fn success(data: T) -> Self {
        ResultJson::Success { data }
    }

    pub fn failure(failure: Failure) -> Self {
        ResultJson::Failure(failure)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultJson::Success { .. })
    }

    /// Failure kind, `None` on success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ResultJson::Success { .. } => None,
            ResultJson::Failure(failure) => Some(failure.kind),
        }
    }

    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            ResultJson::Success { data } => Ok(data),
            ResultJson::Failure(failure) => Err(failure),
        }
    }
}
