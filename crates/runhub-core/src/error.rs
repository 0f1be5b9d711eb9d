//! Core error types.

use thiserror::Error;

use crate::state::{RunEvent, RunState};

/// Errors raised while resolving, building, projecting or executing runs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A registry already holds an entry for this key.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A registry has no entry for this key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A spec failed schema validation.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// A runner could not find a required spec field.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// No builder, runner or framework is registered for the key.
    #[error("Unsupported task: {0}")]
    UnsupportedTask(String),

    /// The event is not accepted in the current state.
    #[error("Illegal transition: {event} not accepted in state {from}")]
    IllegalTransition { from: RunState, event: RunEvent },

    /// A framework failed to hand work to its substrate.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The substrate API returned an error.
    #[error("Substrate error: {0}")]
    Substrate(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl CoreError {
    /// Configuration errors are never retried and do not touch run state.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::DuplicateKey(_) | CoreError::NotFound(_) | CoreError::UnsupportedTask(_)
        )
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Json(e.to_string())
    }
}

impl From<kube::Error> for CoreError {
    fn from(e: kube::Error) -> Self {
        CoreError::Substrate(e.to_string())
    }
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
