//! Error types for drydock-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for drydock-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while managing execution units.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Path escapes the sandbox root or is malformed.
    #[error("invalid path: {0}")]
    Validation(String),

    /// Requested file or directory does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Every unit was busy for the whole acquire wait.
    #[error("capacity exceeded: all {max_units} execution units busy after waiting {waited:?}")]
    CapacityExceeded {
        /// Configured pool bound
        max_units: usize,
        /// How long the caller waited
        waited: Duration,
    },

    /// The runtime raised while executing code.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Execution exceeded its wall-clock budget.
    #[error("execution timed out after {0:?}")]
    ExecTimeout(Duration),

    /// The container runtime is unreachable or refused to create a unit.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The pool has been closed for shutdown.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the unit involved should be discarded rather than reused.
    pub fn poisons_unit(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::ExecTimeout(_) | Self::RuntimeUnavailable(_)
        )
    }
}
