//! Error types for ward-resilience crate.
//!
//! Defines the short-circuit error returned by breakers, the wrapper that lets
//! callers tell it apart from the operation's own failure, and the errors of
//! the administration and configuration surfaces.

use std::time::Duration;

use thiserror::Error;
use ward_types::ErrorId;

/// A breaker refused to run the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{breaker}' is open, retry in {}ms", .retry_after.as_millis())]
pub struct CircuitOpenError {
    /// Name of the refusing breaker.
    pub breaker: String,

    /// Time until the breaker will let a trial call through.
    pub retry_after: Duration,
}

/// Outcome of a protected call that did not succeed.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The operation ran and failed.
    #[error("operation failed: {0}")]
    Operation(E),

    /// The circuit refused to try.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl<E> CallError<E> {
    /// Whether the breaker short-circuited the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen(_))
    }

    /// The operation's own error, if it ran.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            CallError::Operation(e) => Some(e),
            CallError::CircuitOpen(_) => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            CallError::CircuitOpen(_) => None,
        }
    }
}

/// Errors from configuration and administration.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// No breaker registered under this name.
    #[error("circuit breaker not found: {0}")]
    BreakerNotFound(String),

    /// No ledger entry with this id.
    #[error("error entry not found: {0}")]
    ErrorNotFound(ErrorId),

    /// Configuration rejected by validation.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The background scheduler is already running.
    #[error("scheduler already running")]
    SchedulerAlreadyRunning,

    /// The background scheduler needs a tokio runtime.
    #[error("no tokio runtime available to start the scheduler")]
    NoRuntime,
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_distinguishes_refusal() {
        let refused: CallError<std::io::Error> = CircuitOpenError {
            breaker: "payments".into(),
            retry_after: Duration::from_millis(250),
        }
        .into();
        assert!(refused.is_circuit_open());
        assert!(refused.operation_error().is_none());
        assert_eq!(
            refused.to_string(),
            "circuit breaker 'payments' is open, retry in 250ms"
        );

        let failed: CallError<&str> = CallError::Operation("boom");
        assert!(!failed.is_circuit_open());
        assert_eq!(failed.into_operation_error(), Some("boom"));
    }
}
