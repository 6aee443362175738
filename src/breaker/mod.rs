//! Circuit breaker - fail fast when a downstream dependency is unhealthy.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                               │  ▲
//!     │ successes >= trials           │  │ any trial fails
//!     │                reset_timeout  ▼  │
//!     └──────────────────────────── HalfOpen
//! ```

mod circuit_breaker;
mod error;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::CircuitBreakerError;

/// Alias kept for callers that name the rejection after the open state.
pub type CircuitOpenError = CircuitBreakerError;
