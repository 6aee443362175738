//! Shared helpers: fast bus settings and a polling wait.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use interlink::bus::{BusConfig, Event, HandlerError};

pub const WAIT: Duration = Duration::from_secs(5);

/// Bus settings with short blocking reads and retry delays. Also routes
/// log output through the test harness.
pub fn fast_config() -> BusConfig {
    interlink::telemetry::init_for_tests();
    BusConfig::default()
        .with_block(Duration::from_millis(20))
        .with_retry_delay(Duration::from_millis(5))
        .with_error_backoff(Duration::from_millis(10))
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A handler that records every event it sees.
pub fn recorder() -> (
    Arc<Mutex<Vec<Event>>>,
    impl Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = move |event: &Event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    };
    (seen, handler)
}

pub fn count(seen: &Arc<Mutex<Vec<Event>>>) -> usize {
    seen.lock().unwrap().len()
}
