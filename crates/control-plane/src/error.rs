//! Error types for the RunHub control plane.

use runhub_core::CoreError;
use thiserror::Error;

/// Application-level errors for the control plane.
#[derive(Error, Debug)]
pub enum AppError {
    /// Spec, registry, lifecycle or framework error from the core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Run store rejected a read or write
    #[error("Store error: {0}")]
    Store(String),

    /// No run with this id is known
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// No function or task with this id is known
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Execution queue is at capacity
    #[error("Execution queue is full ({0} signals pending)")]
    QueueFull(usize),

    /// Worker pool no longer accepts signals
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metric registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Manifest parse error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl AppError {
    /// Core error carried by this error, if any.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            AppError::Core(e) => Some(e),
            _ => None,
        }
    }

    /// True for rejected lifecycle events.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, AppError::Core(CoreError::IllegalTransition { .. }))
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}
