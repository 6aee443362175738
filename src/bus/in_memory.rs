//! In-memory streams for testing and single-process deployments.
//!
//! `InMemoryStreams` implements `StreamTransport` with Redis Streams
//! semantics: per-stream append-only logs trimmed to a maximum length,
//! consumer groups with a delivery cursor and a pending list, and blocking
//! group reads. Useful for:
//! - Unit and integration tests without a running broker
//! - Single-process applications
//! - Fault injection (unavailable broker, failing appends or reads)

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::event::Event;
use super::transport::{AppendRequest, StreamEntry, StreamInfo, StreamTransport, TransportError};

struct LogEntry {
    seq: u64,
    id: String,
    body: String,
}

#[derive(Default)]
struct GroupState {
    /// Sequence number of the last entry handed to any consumer.
    last_delivered: u64,
    /// Delivered but unacknowledged entries, by sequence, with their consumer.
    pending: BTreeMap<u64, String>,
}

#[derive(Default)]
struct StreamLog {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn push(&mut self, body: &str, max_len: usize) -> String {
        self.next_seq += 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = format!("{}-{}", millis, self.next_seq);
        self.entries.push_back(LogEntry {
            seq: self.next_seq,
            id: id.clone(),
            body: body.to_string(),
        });
        while self.entries.len() > max_len.max(1) {
            self.entries.pop_front();
        }
        id
    }
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    failing_appends: usize,
    failing_reads: usize,
}

/// In-memory, multi-stream log with consumer groups.
///
/// Clones share the same streams *and* the same connection. Use
/// [`InMemoryStreams::connection`] to open another connection to the same
/// streams, e.g. one for publishing and one for consuming.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use interlink::bus::{InMemoryStreams, StreamTransport};
///
/// let streams = InMemoryStreams::new();
/// streams.create_group("events:order.created", "billing").unwrap();
/// streams.append("events:order.created", r#"{"n":1}"#, 100).unwrap();
///
/// let entries = streams
///     .read_group("billing", "billing-1", &["events:order.created".to_string()], 10, Duration::from_millis(10))
///     .unwrap();
/// assert_eq!(entries.len(), 1);
/// assert_eq!(streams.pending_count("events:order.created", "billing").unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryStreams {
    /// Shared streams
    streams: Arc<RwLock<HashMap<String, StreamLog>>>,
    /// Shared fault injection switches
    faults: Arc<Mutex<Faults>>,
    /// Per-connection open flag
    open: Arc<AtomicBool>,
}

impl Default for InMemoryStreams {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreams {
    /// Create an empty set of streams with one open connection.
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(Mutex::new(Faults::default())),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Open a new connection to the same streams.
    ///
    /// Closing one connection does not affect the others.
    pub fn connection(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
            faults: Arc::clone(&self.faults),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the broker becoming unreachable (or reachable again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    /// Make the next `n` appends (single or batch) fail.
    pub fn fail_next_appends(&self, n: usize) {
        self.faults().failing_appends = n;
    }

    /// Make the next `n` group reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.faults().failing_reads = n;
    }

    /// Number of entries currently retained in a stream.
    pub fn len(&self, stream: &str) -> usize {
        self.read_streams()
            .get(stream)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }

    /// Whether a stream is missing or empty.
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Raw entry bodies retained in a stream, oldest first.
    pub fn bodies(&self, stream: &str) -> Vec<String> {
        self.read_streams()
            .get(stream)
            .map(|log| log.entries.iter().map(|e| e.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Events retained in a stream, skipping entries that do not parse.
    pub fn events(&self, stream: &str) -> Vec<Event> {
        self.bodies(stream)
            .iter()
            .filter_map(|body| Event::from_json(body).ok())
            .collect()
    }

    /// Names of all streams that exist.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_streams().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every stream (useful for test cleanup).
    pub fn clear(&self) {
        self.streams
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_streams(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StreamLog>> {
        self.streams.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_streams(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, StreamLog>>, TransportError> {
        self.streams
            .write()
            .map_err(|_| TransportError::CommandFailed("stream lock poisoned".into()))
    }

    fn check_connection(&self) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.faults().unavailable {
            return Err(TransportError::ConnectionFailed("broker unavailable".into()));
        }
        Ok(())
    }

    fn take_append_fault(&self) -> Result<(), TransportError> {
        let mut faults = self.faults();
        if faults.failing_appends > 0 {
            faults.failing_appends -= 1;
            return Err(TransportError::CommandFailed("append not acknowledged".into()));
        }
        Ok(())
    }

    fn take_read_fault(&self) -> Result<(), TransportError> {
        let mut faults = self.faults();
        if faults.failing_reads > 0 {
            faults.failing_reads -= 1;
            return Err(TransportError::ConnectionFailed("read interrupted".into()));
        }
        Ok(())
    }
}

/// Entry ids are `<millis>-<seq>`; the sequence orders entries in a stream.
fn parse_seq(id: &str) -> Option<u64> {
    id.rsplit('-').next()?.parse().ok()
}

impl StreamTransport for InMemoryStreams {
    fn append(&self, stream: &str, body: &str, max_len: usize) -> Result<String, TransportError> {
        self.check_connection()?;
        self.take_append_fault()?;
        let mut streams = self.write_streams()?;
        Ok(streams
            .entry(stream.to_string())
            .or_default()
            .push(body, max_len))
    }

    fn append_batch(
        &self,
        entries: &[AppendRequest],
        max_len: usize,
    ) -> Result<Vec<String>, TransportError> {
        self.check_connection()?;
        self.take_append_fault()?;
        let mut streams = self.write_streams()?;
        Ok(entries
            .iter()
            .map(|entry| {
                streams
                    .entry(entry.stream.clone())
                    .or_default()
                    .push(&entry.body, max_len)
            })
            .collect())
    }

    fn create_group(&self, stream: &str, group: &str) -> Result<(), TransportError> {
        self.check_connection()?;
        let mut streams = self.write_streams()?;
        let log = streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Err(TransportError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        log.groups.insert(group.to_string(), GroupState::default());
        Ok(())
    }

    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let deadline = Instant::now() + block;

        loop {
            self.check_connection()?;
            self.take_read_fault()?;

            {
                let mut logs = self.write_streams()?;
                let mut delivered = Vec::new();

                for name in streams {
                    let log = logs.get_mut(name).ok_or_else(|| TransportError::NoSuchGroup {
                        stream: name.clone(),
                        group: group.to_string(),
                    })?;
                    let state =
                        log.groups
                            .get_mut(group)
                            .ok_or_else(|| TransportError::NoSuchGroup {
                                stream: name.clone(),
                                group: group.to_string(),
                            })?;

                    // COUNT applies to each stream, not to the whole read.
                    let cursor = state.last_delivered;
                    for entry in log.entries.iter().filter(|e| e.seq > cursor).take(count) {
                        state.last_delivered = entry.seq;
                        state.pending.insert(entry.seq, consumer.to_string());
                        delivered.push(StreamEntry {
                            stream: name.clone(),
                            id: entry.id.clone(),
                            body: entry.body.clone(),
                        });
                    }
                }

                if !delivered.is_empty() {
                    return Ok(delivered);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), TransportError> {
        self.check_connection()?;
        let seq = parse_seq(id)
            .ok_or_else(|| TransportError::CommandFailed(format!("invalid entry id {}", id)))?;
        let mut streams = self.write_streams()?;
        let state = streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
            .ok_or_else(|| TransportError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        state.pending.remove(&seq);
        Ok(())
    }

    fn pending_count(&self, stream: &str, group: &str) -> Result<u64, TransportError> {
        self.check_connection()?;
        let streams = self.read_streams();
        streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|state| state.pending.len() as u64)
            .ok_or_else(|| TransportError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }

    fn stream_info(&self, stream: &str) -> Result<StreamInfo, TransportError> {
        self.check_connection()?;
        let streams = self.read_streams();
        let log = streams
            .get(stream)
            .ok_or_else(|| TransportError::CommandFailed(format!("no such stream {}", stream)))?;
        Ok(StreamInfo {
            length: log.entries.len() as u64,
            first_entry_id: log.entries.front().map(|e| e.id.clone()),
            last_entry_id: log.entries.back().map(|e| e.id.clone()),
            groups: log.groups.len() as u64,
        })
    }

    fn is_ready(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.faults().unavailable
    }

    fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
