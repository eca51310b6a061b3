//! Typed error hierarchy for the build engine.
//!
//! `BuildError` covers every failure the engine reports. Errors local to one
//! task attempt (`Timeout`, `Execution`) feed the retry machinery; the rest
//! abort the operation that raised them.

use std::time::Duration;
use thiserror::Error;

/// Errors from planning, scheduling, execution and session bookkeeping.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Malformed plan or spec. Aborts planning.
    #[error("Invalid plan: {0}")]
    Validation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Task graph or deploy order contains a cycle.
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    #[error("Task {task_id} timed out after {}s", .after.as_secs())]
    Timeout { task_id: String, after: Duration },

    #[error("Task {task_id} failed: {message}")]
    Execution { task_id: String, message: String },

    #[error("Build cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        BuildError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether a task attempt that failed this way may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BuildError::Timeout { .. } | BuildError::Execution { .. })
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
