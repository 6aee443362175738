//! Error types for synchronous service calls.

use std::error::Error;
use std::fmt;

use crate::breaker::CircuitBreakerError;

/// Error returned by `ServiceClient` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The target answered with a non-success status.
    Status { status: u16, body: String },
    /// The request never produced a response (connect, reset, timeout).
    Network(String),
    /// The circuit breaker rejected the call; the target was not contacted.
    CircuitOpen(CircuitBreakerError),
    /// The response body did not decode into the expected type.
    Decode(String),
    /// The request could not be built (bad body, bad header).
    InvalidRequest(String),
}

impl RequestError {
    /// Whether another attempt could succeed.
    ///
    /// 4xx responses describe a bad request and are final; network failures
    /// and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Status { status, .. } => *status >= 500,
            RequestError::Network(_) => true,
            RequestError::CircuitOpen(_)
            | RequestError::Decode(_)
            | RequestError::InvalidRequest(_) => false,
        }
    }

    /// HTTP status, if the target answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RequestError::CircuitOpen(_))
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Status { status, body } if body.is_empty() => {
                write!(f, "request failed with status {}", status)
            }
            RequestError::Status { status, body } => {
                write!(f, "request failed with status {}: {}", status, body)
            }
            RequestError::Network(msg) => write!(f, "network error: {}", msg),
            RequestError::CircuitOpen(e) => write!(f, "{}", e),
            RequestError::Decode(msg) => write!(f, "response decode failed: {}", msg),
            RequestError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl Error for RequestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RequestError::CircuitOpen(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CircuitBreakerError> for RequestError {
    fn from(err: CircuitBreakerError) -> Self {
        RequestError::CircuitOpen(err)
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::Decode(err.to_string())
    }
}
