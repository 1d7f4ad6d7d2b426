//! Error types for the dispatch engine.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error, accepted wherever a handler can signal a failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The error value carried through the error chain.
///
/// It is opaque to the engine and shared, so every error handler sees the
/// same instance and the dispatch caller can receive it unchanged.
pub type HandlerError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors returned by [`Router::dispatch`](crate::Router::dispatch).
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// A handler signalled an error and no error handler resolved it.
    ///
    /// Holds the most recently signalled error, which is not necessarily the
    /// one that first entered the error chain.
    #[error("unresolved handler error: {0}")]
    Unresolved(HandlerError),
}

impl DispatchError {
    /// Returns the handler error that escaped the error chain.
    pub fn handler_error(&self) -> &HandlerError {
        match self {
            Self::Unresolved(err) => err,
        }
    }

    /// Consumes this error, returning the handler error.
    pub fn into_handler_error(self) -> HandlerError {
        match self {
            Self::Unresolved(err) => err,
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult = Result<(), DispatchError>;

/// Converts anything a handler may signal into a shared [`HandlerError`].
pub(crate) fn into_handler_error(err: impl Into<BoxError>) -> HandlerError {
    let boxed: BoxError = err.into();
    Arc::from(boxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_display() {
        let err = DispatchError::Unresolved(into_handler_error("boom"));
        assert_eq!(err.to_string(), "unresolved handler error: boom");
        assert_eq!(err.handler_error().to_string(), "boom");
    }

    #[test]
    fn test_into_handler_error_keeps_message() {
        let err = into_handler_error(String::from("Could not fix!"));
        let dispatch = DispatchError::Unresolved(err);
        assert_eq!(dispatch.into_handler_error().to_string(), "Could not fix!");
    }
}
