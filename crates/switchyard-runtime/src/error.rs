//! Runtime error types.

use switchyard_core::BoxError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that end a listener or prevent it from starting.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The payload source reported an unrecoverable failure.
    #[error("Payload source failed: {0}")]
    Source(BoxError),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
