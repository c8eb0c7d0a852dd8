//! Error types.
//!
//! Two layers:
//!
//! - [`EngineError`] is what the numerical engine returns. Partition-local
//!   failures are caught by the pipeline and recorded as omitted partitions.
//! - [`AppError`] is what the binary reports: a message plus a process exit code.

use thiserror::Error;

/// Errors raised by the regression/bootstrap engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Missing or non-numeric values, empty categorical domains, degenerate inputs.
    #[error("data error: {0}")]
    Data(String),

    /// A super-region is still below the minimum sample size after merging.
    #[error("partition '{partition}' has {n} observations, below the minimum of {min}")]
    PartitionSize {
        partition: String,
        n: usize,
        min: usize,
    },

    /// Non-finite arithmetic or a design the solver cannot recover from.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Invalid run configuration (region map, settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Cooperative cancellation was requested; partial results were discarded.
    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),
}

impl EngineError {
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }

    /// Process exit code used when this error terminates the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Data(_) | EngineError::Config(_) | EngineError::Io(_) => 2,
            EngineError::PartitionSize { .. } => 3,
            EngineError::Numerical(_) => 4,
            EngineError::Cancelled => 130,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        EngineError::Io(value.to_string())
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        AppError::new(value.exit_code(), value.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
