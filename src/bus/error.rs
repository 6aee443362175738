//! Error types for the event bus.

use std::error::Error;
use std::fmt;

use super::transport::TransportError;

/// Error returned by publish and subscribe operations.
#[derive(Debug)]
pub enum BusError {
    /// The log transport failed or did not acknowledge the operation.
    Transport(TransportError),
    /// The event could not be serialized.
    Serialization(String),
    /// The bus has been closed.
    Closed,
    /// The consume loop thread could not be started.
    Spawn(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Transport(e) => write!(f, "transport error: {}", e),
            BusError::Serialization(msg) => write!(f, "serialization failed: {}", msg),
            BusError::Closed => write!(f, "event bus is closed"),
            BusError::Spawn(msg) => write!(f, "cannot start consume loop: {}", msg),
        }
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BusError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for BusError {
    fn from(err: TransportError) -> Self {
        BusError::Transport(err)
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

/// Error returned by a subscriber's handler.
///
/// Any handler error triggers the bus retry policy; the variants only
/// change what gets logged.
#[derive(Debug)]
pub enum HandlerError {
    /// The handler refused the event (business rule, invariant violation).
    Rejected(String),
    /// The payload did not match the shape the handler expects.
    DecodeFailed(String),
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        HandlerError::Rejected(msg.into())
    }

    /// Wrap any error raised by downstream work.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Rejected(msg) => write!(f, "rejected: {}", msg),
            HandlerError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
            HandlerError::Other(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl From<crate::client::RequestError> for HandlerError {
    fn from(err: crate::client::RequestError) -> Self {
        HandlerError::Other(Box::new(err))
    }
}
