use std::fmt;

use super::CircuitState;

/// A call was rejected by the breaker without reaching the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerError {
    /// The guarded target (usually a service name).
    pub target: String,
    /// Breaker state at the time of rejection.
    pub state: CircuitState,
}

impl fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            CircuitState::HalfOpen => write!(
                f,
                "circuit breaker for {} is half-open and its trial quota is in use",
                self.target
            ),
            _ => write!(f, "circuit breaker for {} is open", self.target),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}
