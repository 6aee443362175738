//! Event bus - publish/subscribe over a durable stream transport.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{BusError, HandlerError};
use super::event::{BatchEvent, Event, PublishOptions};
use super::in_memory::InMemoryStreams;
use super::subscription::{Handler, HandlerTable, Subscription};
use super::transport::{AppendRequest, StreamEntry, StreamInfo, StreamTransport, TransportError};

/// Tracing target for handlers that exhausted their retries.
pub const DEAD_LETTER_TARGET: &str = "interlink::dead_letter";

/// Tuning for one event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Prefix joined with the event type to form the stream key.
    pub stream_prefix: String,
    /// Approximate number of entries retained per stream.
    pub max_len: usize,
    /// Total attempts per handler per delivery.
    pub max_retries: u32,
    /// Base backoff; attempt `n` is followed by a sleep of `retry_delay * n`.
    #[serde(rename = "retry_delay_ms", with = "crate::config::duration_ms")]
    pub retry_delay: Duration,
    /// Maximum entries per blocking read.
    pub read_count: usize,
    /// How long one read blocks waiting for entries.
    #[serde(rename = "block_ms", with = "crate::config::duration_ms")]
    pub block: Duration,
    /// Pause after a failed read before the loop continues.
    #[serde(rename = "error_backoff_ms", with = "crate::config::duration_ms")]
    pub error_backoff: Duration,
    /// Consumer id inside the group; `<service>-<uuid>` when unset.
    pub consumer_name: Option<String>,
    /// Stream that receives events whose handler exhausted its retries.
    /// Off by default: such events are logged and acknowledged.
    pub dead_letter_stream: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            stream_prefix: "events:".to_string(),
            max_len: 10_000,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            read_count: 10,
            block: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            consumer_name: None,
            dead_letter_stream: None,
        }
    }
}

impl BusConfig {
    pub fn with_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = prefix.into();
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_read_count(mut self, count: usize) -> Self {
        self.read_count = count;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    pub fn with_dead_letter_stream(mut self, stream: impl Into<String>) -> Self {
        self.dead_letter_stream = Some(stream.into());
        self
    }
}

/// Counters kept by the consume loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Read cycles completed.
    pub polls: u64,
    /// Entries parsed and handed to handlers.
    pub delivered: u64,
    /// Entries acknowledged to the consumer group.
    pub acknowledged: u64,
    /// Handler re-invocations after a failure.
    pub retries: u64,
    /// Handlers that failed every attempt.
    pub handler_failures: u64,
    /// Entries whose body was not a valid event.
    pub malformed: u64,
    /// Failed blocking reads.
    pub read_errors: u64,
    /// Failed acknowledgments.
    pub ack_failures: u64,
}

/// State shared between the bus handle and its consume thread.
struct Shared<T> {
    service_name: String,
    consumer_name: String,
    config: BusConfig,
    consumer: T,
    table: Arc<HandlerTable>,
    stop: AtomicBool,
    stats: Mutex<BusStats>,
}

/// At-least-once event bus for one service.
///
/// Publishing appends JSON-encoded events to the stream
/// `<stream_prefix><event_type>`. Subscribing joins the service's consumer
/// group on that stream and registers a handler; one background thread per
/// bus reads every subscribed stream, runs the handlers with retries, and
/// acknowledges each entry once all of its handlers have finished.
///
/// The bus owns two connections: `publisher` for appends and group
/// management, `consumer` for the consume loop's blocking reads.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use serde_json::json;
/// use interlink::bus::{BusConfig, EventBus, InMemoryStreams, PublishOptions};
///
/// let streams = InMemoryStreams::new();
/// let bus = EventBus::in_memory(
///     "billing",
///     BusConfig::default().with_block(Duration::from_millis(20)),
///     &streams,
/// );
///
/// let sub = bus
///     .subscribe("order.created", |event| {
///         assert_eq!(event.payload()["orderId"], "A1");
///         Ok(())
///     })
///     .unwrap();
///
/// let id = bus
///     .publish("order.created", json!({ "orderId": "A1" }), PublishOptions::new())
///     .unwrap();
/// assert!(!id.is_empty());
///
/// sub.unsubscribe();
/// bus.close().unwrap();
/// ```
pub struct EventBus<T: StreamTransport + 'static> {
    publisher: T,
    shared: Arc<Shared<T>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl EventBus<InMemoryStreams> {
    /// Build a bus over in-memory streams, opening separate publish and
    /// consume connections.
    pub fn in_memory(
        service_name: impl Into<String>,
        config: BusConfig,
        streams: &InMemoryStreams,
    ) -> Self {
        Self::new(service_name, config, streams.connection(), streams.connection())
    }
}

impl<T: StreamTransport + 'static> EventBus<T> {
    /// Create a bus for `service_name` from a publish connection and a
    /// consume connection.
    pub fn new(service_name: impl Into<String>, config: BusConfig, publisher: T, consumer: T) -> Self {
        let service_name = service_name.into();
        let consumer_name = config
            .consumer_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", service_name, Uuid::new_v4()));

        Self {
            publisher,
            shared: Arc::new(Shared {
                service_name,
                consumer_name,
                config,
                consumer,
                table: Arc::new(HandlerTable::default()),
                stop: AtomicBool::new(false),
                stats: Mutex::new(BusStats::default()),
            }),
            loop_handle: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.shared.service_name
    }

    /// This process's consumer id within the service's group.
    pub fn consumer_name(&self) -> &str {
        &self.shared.consumer_name
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// Stream key for an event type.
    pub fn stream_key(&self, event_type: &str) -> String {
        self.shared.stream_key(event_type)
    }

    /// Publish one event and return its id.
    ///
    /// Not retried: if the transport does not acknowledge the append the
    /// error is returned and the caller decides what to do.
    pub fn publish(
        &self,
        event_type: &str,
        payload: Value,
        options: PublishOptions,
    ) -> Result<String, BusError> {
        self.ensure_open()?;
        let event = Event::stamp(event_type, payload, &self.shared.service_name, options);
        let body = event.to_json()?;

        self.publisher
            .append(&self.stream_key(event_type), &body, self.shared.config.max_len)
            .map_err(|e| {
                warn!(event_type, error = %e, "publish failed");
                BusError::from(e)
            })?;

        debug!(event_type, event_id = event.id(), "published");
        Ok(event.id().to_string())
    }

    /// Publish several events in one pipelined append.
    ///
    /// All-or-nothing from the caller's point of view: any failure yields a
    /// single error and no ids. Publish individually when per-event
    /// outcomes matter.
    pub fn publish_batch(&self, events: Vec<BatchEvent>) -> Result<Vec<String>, BusError> {
        self.ensure_open()?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(events.len());
        let mut requests = Vec::with_capacity(events.len());
        for batch_event in events {
            let event = Event::stamp(
                &batch_event.event_type,
                batch_event.payload,
                &self.shared.service_name,
                batch_event.options,
            );
            requests.push(AppendRequest {
                stream: self.stream_key(&batch_event.event_type),
                body: event.to_json()?,
            });
            ids.push(event.id().to_string());
        }

        self.publisher
            .append_batch(&requests, self.shared.config.max_len)
            .map_err(|e| {
                warn!(count = requests.len(), error = %e, "batch publish failed");
                BusError::from(e)
            })?;

        debug!(count = ids.len(), "published batch");
        Ok(ids)
    }

    /// Register a handler for an event type.
    ///
    /// Creates the service's consumer group on the stream if it does not
    /// exist yet and starts the consume loop on first use.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> Result<Subscription, BusError>
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, Arc::new(handler))
    }

    /// Register several handlers at once.
    ///
    /// If any registration fails, the ones already made by this call are
    /// removed before the error is returned.
    pub fn subscribe_many<I, S>(&self, subscriptions: I) -> Result<Vec<Subscription>, BusError>
    where
        I: IntoIterator<Item = (S, Handler)>,
        S: AsRef<str>,
    {
        let mut registered = Vec::new();
        for (event_type, handler) in subscriptions {
            match self.subscribe_handler(event_type.as_ref(), handler) {
                Ok(sub) => registered.push(sub),
                Err(e) => {
                    for sub in &registered {
                        sub.unsubscribe();
                    }
                    return Err(e);
                }
            }
        }
        Ok(registered)
    }

    fn subscribe_handler(&self, event_type: &str, handler: Handler) -> Result<Subscription, BusError> {
        self.ensure_open()?;
        let stream = self.stream_key(event_type);

        match self.publisher.create_group(&stream, &self.shared.service_name) {
            Ok(()) => debug!(stream = %stream, group = %self.shared.service_name, "created consumer group"),
            Err(TransportError::GroupExists { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let subscription = self.shared.table.insert(event_type, handler);
        self.ensure_loop()?;
        debug!(event_type, "subscribed");
        Ok(subscription)
    }

    /// Event types that currently have at least one handler.
    pub fn subscribed_types(&self) -> Vec<String> {
        self.shared.table.event_types()
    }

    /// Delivered but unacknowledged entries for this service's group.
    /// Best effort: 0 when the transport cannot answer.
    pub fn pending_count(&self, event_type: &str) -> u64 {
        self.publisher
            .pending_count(&self.stream_key(event_type), &self.shared.service_name)
            .unwrap_or_else(|e| {
                debug!(event_type, error = %e, "pending count unavailable");
                0
            })
    }

    /// Stream summary. Best effort: `None` when the transport cannot answer.
    pub fn stream_info(&self, event_type: &str) -> Option<StreamInfo> {
        self.publisher
            .stream_info(&self.stream_key(event_type))
            .map_err(|e| debug!(event_type, error = %e, "stream info unavailable"))
            .ok()
    }

    pub fn stats(&self) -> BusStats {
        *self.shared.stats()
    }

    /// Whether the consume loop thread is alive.
    pub fn is_running(&self) -> bool {
        lock(&self.loop_handle)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// True only when both connections are ready.
    pub fn is_connected(&self) -> bool {
        self.publisher.is_ready() && self.shared.consumer.is_ready()
    }

    /// Stop the consume loop and close both connections.
    ///
    /// Waits for the loop to finish its current iteration, so a handler
    /// that is running completes first. Calling `close` again is a no-op.
    pub fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.stop.store(true, Ordering::SeqCst);
        // Release the lock before joining; handlers may call back into the bus.
        let handle = lock(&self.loop_handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(service = %self.shared.service_name, "consume loop panicked");
            }
        }

        let publisher = self.publisher.close();
        let consumer = self.shared.consumer.close();
        info!(service = %self.shared.service_name, "event bus closed");
        publisher?;
        consumer?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn ensure_loop(&self) -> Result<(), BusError> {
        let mut guard = lock(&self.loop_handle);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-consumer", self.shared.service_name))
            .spawn(move || shared.run())
            .map_err(|e| BusError::Spawn(e.to_string()))?;
        *guard = Some(handle);
        Ok(())
    }
}

impl<T: StreamTransport + 'static> Drop for EventBus<T> {
    fn drop(&mut self) {
        // Signal stop without waiting; `close` is the orderly path.
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

impl<T: StreamTransport> Shared<T> {
    fn stream_key(&self, event_type: &str) -> String {
        format!("{}{}", self.config.stream_prefix, event_type)
    }

    fn stats(&self) -> MutexGuard<'_, BusStats> {
        lock(&self.stats)
    }

    fn run(&self) {
        info!(
            service = %self.service_name,
            consumer = %self.consumer_name,
            "consume loop started"
        );
        while !self.stop.load(Ordering::SeqCst) {
            self.poll_once();
        }
        info!(service = %self.service_name, "consume loop stopped");
    }

    /// One loop iteration: a blocking read across every subscribed stream,
    /// then sequential processing of what came back.
    fn poll_once(&self) {
        let streams: Vec<String> = self
            .table
            .event_types()
            .iter()
            .map(|event_type| self.stream_key(event_type))
            .collect();

        self.stats().polls += 1;

        if streams.is_empty() {
            thread::sleep(self.config.block);
            return;
        }

        match self.consumer.read_group(
            &self.service_name,
            &self.consumer_name,
            &streams,
            self.config.read_count,
            self.config.block,
        ) {
            Ok(entries) => {
                for entry in entries {
                    self.process(&entry);
                }
            }
            Err(e) => {
                warn!(
                    service = %self.service_name,
                    error = %e,
                    backoff_ms = self.config.error_backoff.as_millis() as u64,
                    "stream read failed"
                );
                self.stats().read_errors += 1;
                thread::sleep(self.config.error_backoff);
            }
        }
    }

    fn process(&self, entry: &StreamEntry) {
        let event = match Event::from_json(&entry.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(stream = %entry.stream, entry_id = %entry.id, error = %e, "discarding malformed entry");
                self.stats().malformed += 1;
                self.ack(entry);
                return;
            }
        };

        self.stats().delivered += 1;
        for handler in self.table.handlers_for(event.event_type()) {
            self.run_handler(&handler, &event);
        }
        self.ack(entry);
    }

    /// Invoke a handler up to `max_retries` times with linear backoff.
    fn run_handler(&self, handler: &Handler, event: &Event) {
        let attempts = self.config.max_retries.max(1);

        for attempt in 1..=attempts {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)))
                .unwrap_or_else(|_| Err(HandlerError::rejected("handler panicked")));

            let err = match outcome {
                Ok(()) => return,
                Err(err) => err,
            };

            if attempt < attempts {
                warn!(
                    event_type = event.event_type(),
                    event_id = event.id(),
                    attempt,
                    error = %err,
                    "handler failed, retrying"
                );
                self.stats().retries += 1;
                thread::sleep(self.config.retry_delay * attempt);
            } else {
                error!(
                    target: DEAD_LETTER_TARGET,
                    service = %self.service_name,
                    event_type = event.event_type(),
                    event_id = event.id(),
                    attempts,
                    error = %err,
                    "handler exhausted retries"
                );
                self.stats().handler_failures += 1;
                self.dead_letter(event, &err);
            }
        }
    }

    fn dead_letter(&self, event: &Event, err: &HandlerError) {
        let Some(stream) = &self.config.dead_letter_stream else {
            return;
        };

        let record = json!({
            "event": event,
            "group": self.service_name,
            "error": err.to_string(),
            "failedAt": chrono::Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .consumer
            .append(stream, &record.to_string(), self.config.max_len)
        {
            error!(
                target: DEAD_LETTER_TARGET,
                stream = %stream,
                event_id = event.id(),
                error = %e,
                "dead letter append failed"
            );
        }
    }

    fn ack(&self, entry: &StreamEntry) {
        match self.consumer.ack(&entry.stream, &self.service_name, &entry.id) {
            Ok(()) => self.stats().acknowledged += 1,
            Err(e) => {
                warn!(stream = %entry.stream, entry_id = %entry.id, error = %e, "ack failed");
                self.stats().ack_failures += 1;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
