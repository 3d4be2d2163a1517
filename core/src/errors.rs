//! Error types for circuit breaker operations

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by context builders and cleaners
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during circuit breaker operations
#[derive(Debug, Error)]
pub enum CircuitError<E = BoxError> {
    /// Circuit is not closed, the command was not executed
    #[error("Circuit '{circuit}' is open")]
    Open { circuit: String },
    /// The command did not settle within the configured timeout
    #[error("Circuit '{circuit}' command timed out after {}ms", .timeout.as_millis())]
    Timeout { circuit: String, timeout: Duration },
    /// The wrapped command (or a fallback) failed
    #[error("Circuit execution failed: {0}")]
    Execution(#[source] E),
}

/// Discriminant of a [`CircuitError`], for fallbacks and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Open,
    Timeout,
    Execution,
}

impl<E> CircuitError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CircuitError::Open { .. } => ErrorKind::Open,
            CircuitError::Timeout { .. } => ErrorKind::Timeout,
            CircuitError::Execution(_) => ErrorKind::Execution,
        }
    }

    pub fn is_open(&self) -> bool {
        self.kind() == ErrorKind::Open
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// The command's own error, if this is one
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}
