use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::CircuitBreakerError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// A limited number of trial calls decide whether to close or re-open.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning. Defaults: 5 failures, 30 s reset timeout, 3 trials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Time after the last failure before an open breaker admits a trial.
    #[serde(rename = "reset_timeout_ms", with = "crate::config::duration_ms")]
    pub reset_timeout: Duration,
    /// Concurrent trials allowed while half-open, and successes needed to close.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_half_open_requests(mut self, requests: u32) -> Self {
        self.half_open_requests = requests;
        self
    }
}

/// Point-in-time view of a breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub half_open_in_flight: u32,
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            half_open_in_flight: 0,
        }
    }
}

/// Failure detector guarding calls to one downstream target.
///
/// All state lives behind a mutex, so one breaker can be shared by any
/// number of threads. The lock is never held while the guarded call runs.
///
/// ## Example
///
/// ```
/// use interlink::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
///
/// #[derive(Debug)]
/// enum CallError {
///     Down,
///     Rejected(CircuitBreakerError),
/// }
///
/// impl From<CircuitBreakerError> for CallError {
///     fn from(err: CircuitBreakerError) -> Self {
///         CallError::Rejected(err)
///     }
/// }
///
/// let breaker = CircuitBreaker::new("reviews", CircuitBreakerConfig::default().with_failure_threshold(2));
///
/// for _ in 0..2 {
///     let _ = breaker.execute(|| Err::<(), _>(CallError::Down));
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
///
/// let result = breaker.execute(|| Ok::<_, CallError>("never runs"));
/// assert!(matches!(result, Err(CallError::Rejected(_))));
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `call` under the breaker.
    ///
    /// When the breaker rejects the call, `call` is not invoked and the
    /// rejection is converted into the caller's error type. Otherwise the
    /// call's own result, error included, is returned unchanged. A call
    /// that panics counts as a failure.
    pub fn execute<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<CircuitBreakerError>,
    {
        let mut attempt = Attempt {
            breaker: self,
            trial: self.admit().map_err(E::from)?,
            settled: false,
        };
        let result = call();
        attempt.settled = true;
        match &result {
            Ok(_) => self.on_success(attempt.trial),
            Err(_) => self.on_failure(attempt.trial),
        }
        result
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            half_open_in_flight: inner.half_open_in_flight,
            since_last_failure: inner.last_failure.map(|t| t.elapsed()),
        }
    }

    /// Force the breaker closed with every counter zeroed.
    pub fn reset(&self) {
        *self.lock() = Inner::closed();
        info!(target_service = %self.name, "circuit breaker reset");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a call may proceed. `Ok(true)` marks a half-open trial.
    fn admit(&self) -> Result<bool, CircuitBreakerError> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => return Ok(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if !cooled_down {
                    return Err(self.rejection(CircuitState::Open));
                }
                inner.state = CircuitState::HalfOpen;
                inner.successes = 0;
                inner.half_open_in_flight = 0;
                info!(target_service = %self.name, "circuit breaker half-open");
            }
            CircuitState::HalfOpen => {}
        }

        if inner.half_open_in_flight >= self.config.half_open_requests.max(1) {
            return Err(self.rejection(CircuitState::HalfOpen));
        }
        inner.half_open_in_flight += 1;
        Ok(true)
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.half_open_requests.max(1) {
                    *inner = Inner::closed();
                    info!(target_service = %self.name, "circuit breaker closed");
                }
            }
            // A trial finished after a sibling trial re-opened the circuit.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        let reopen = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if reopen {
            inner.state = CircuitState::Open;
            inner.successes = 0;
            inner.half_open_in_flight = 0;
            warn!(
                target_service = %self.name,
                failures = inner.failures,
                "circuit breaker opened"
            );
        }
    }

    fn rejection(&self, state: CircuitState) -> CircuitBreakerError {
        CircuitBreakerError {
            target: self.name.clone(),
            state,
        }
    }
}

/// Counts an admitted call as a failure if it unwinds before settling,
/// so a panicking half-open trial still frees its slot.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(self.trial);
        }
    }
}
