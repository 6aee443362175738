//! Circuit breaker state machine, including concurrent callers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use interlink::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

#[derive(Debug, PartialEq)]
enum CallError {
    Downstream(&'static str),
    Rejected(CircuitState),
}

impl From<CircuitBreakerError> for CallError {
    fn from(err: CircuitBreakerError) -> Self {
        CallError::Rejected(err.state)
    }
}

fn config(reset_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig::default().with_reset_timeout(Duration::from_millis(reset_ms))
}

fn trip(breaker: &CircuitBreaker) {
    for _ in 0..breaker.config().failure_threshold {
        let _ = breaker.execute(|| Err::<(), _>(CallError::Downstream("boom")));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn full_cycle() {
    let breaker = CircuitBreaker::new("payments", config(30));

    // closed -> open after five failures, each returning the call's own error
    for _ in 0..5 {
        assert_eq!(
            breaker.execute(|| Err::<(), _>(CallError::Downstream("timeout"))),
            Err(CallError::Downstream("timeout"))
        );
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // open: fast rejection
    assert_eq!(
        breaker.execute(|| Ok::<_, CallError>(1)),
        Err(CallError::Rejected(CircuitState::Open))
    );

    // half-open after the timeout, closed after three successful trials
    thread::sleep(Duration::from_millis(40));
    for n in 0..3 {
        assert_eq!(breaker.execute(|| Ok::<_, CallError>(n)), Ok(n));
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn one_failed_trial_reopens() {
    let breaker = CircuitBreaker::new("payments", config(30));
    trip(&breaker);
    thread::sleep(Duration::from_millis(40));

    assert_eq!(breaker.execute(|| Ok::<_, CallError>(())), Ok(()));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let _ = breaker.execute(|| Err::<(), _>(CallError::Downstream("still down")));
    assert_eq!(breaker.state(), CircuitState::Open);

    // The failed trial restarted the timeout.
    assert_eq!(
        breaker.execute(|| Ok::<_, CallError>(())),
        Err(CallError::Rejected(CircuitState::Open))
    );
}

#[test]
fn open_breaker_never_invokes_the_call() {
    let breaker = CircuitBreaker::new("payments", config(60_000));
    trip(&breaker);

    let invoked = AtomicUsize::new(0);
    for _ in 0..10 {
        let result = breaker.execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CallError>(())
        });
        assert!(result.is_err());
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_failures_open_exactly_once() {
    let breaker = Arc::new(CircuitBreaker::new("payments", config(60_000)));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let breaker = breaker.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    let _ = breaker.execute(|| Err::<(), _>(CallError::Downstream("boom")));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    // Rejected calls are not failures of the target.
    assert!(snapshot.failures >= 5);
    assert!(snapshot.failures < 80);
}

#[test]
fn half_open_admits_at_most_the_trial_quota_concurrently() {
    let breaker = Arc::new(CircuitBreaker::new(
        "payments",
        config(20).with_half_open_requests(2),
    ));
    trip(&breaker);
    thread::sleep(Duration::from_millis(30));

    let admitted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let breaker = breaker.clone();
            let admitted = admitted.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                breaker.execute(|| {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    Ok::<_, CallError>(())
                })
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(CallError::Rejected(CircuitState::HalfOpen))))
        .count();

    assert_eq!(admitted.load(Ordering::SeqCst), 2);
    assert_eq!(rejected, 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn rejection_names_the_target() {
    let breaker = CircuitBreaker::new("payments", config(60_000));
    for _ in 0..5 {
        let _ = breaker.execute(|| Err::<(), CircuitBreakerError>(CircuitBreakerError {
            target: "inner".into(),
            state: CircuitState::Closed,
        }));
    }

    let err = breaker
        .execute(|| Ok::<_, CircuitBreakerError>(()))
        .unwrap_err();
    assert_eq!(err.target, "payments");
    assert_eq!(err.state, CircuitState::Open);
    assert_eq!(err.to_string(), "circuit breaker for payments is open");
}
