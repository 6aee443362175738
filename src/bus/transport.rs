//! Durable log transport: the append-only, consumer-group-capable store
//! the bus writes to and reads from.

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// One entry read from a stream on behalf of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream the entry was read from.
    pub stream: String,
    /// Transport-assigned entry id (used for acknowledgment).
    pub id: String,
    /// The `data` field of the entry: a JSON-serialized event.
    pub body: String,
}

/// Read-only summary of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub length: u64,
    pub first_entry_id: Option<String>,
    pub last_entry_id: Option<String>,
    pub groups: u64,
}

/// An entry queued for a pipelined batch append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    pub stream: String,
    pub body: String,
}

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established or was lost.
    ConnectionFailed(String),
    /// The connection was closed locally.
    Closed,
    /// A consumer group with this name already exists on the stream.
    GroupExists { stream: String, group: String },
    /// The stream or group does not exist.
    NoSuchGroup { stream: String, group: String },
    /// The transport rejected or failed a command.
    CommandFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Closed => write!(f, "connection closed"),
            TransportError::GroupExists { stream, group } => {
                write!(f, "consumer group {} already exists on {}", group, stream)
            }
            TransportError::NoSuchGroup { stream, group } => {
                write!(f, "no consumer group {} on {}", group, stream)
            }
            TransportError::CommandFailed(msg) => write!(f, "command failed: {}", msg),
        }
    }
}

impl Error for TransportError {}

/// A partitioned, append-only log with consumer groups (Redis Streams
/// semantics).
///
/// One value of an implementing type is one *connection*. The bus holds two:
/// the consume loop performs long blocking reads on its own connection so
/// that publishes never queue behind them.
pub trait StreamTransport: Send + Sync {
    /// Append one entry, trimming the stream to roughly `max_len` entries.
    /// Returns the transport-assigned entry id.
    fn append(&self, stream: &str, body: &str, max_len: usize) -> Result<String, TransportError>;

    /// Append several entries as one pipelined operation.
    ///
    /// Either every entry is acknowledged or the whole call fails. The
    /// default implementation appends sequentially; real transports should
    /// pipeline.
    fn append_batch(
        &self,
        entries: &[AppendRequest],
        max_len: usize,
    ) -> Result<Vec<String>, TransportError> {
        entries
            .iter()
            .map(|entry| self.append(&entry.stream, &entry.body, max_len))
            .collect()
    }

    /// Create a consumer group, creating the stream if needed.
    ///
    /// Returns `TransportError::GroupExists` if the group is already there.
    fn create_group(&self, stream: &str, group: &str) -> Result<(), TransportError>;

    /// Read entries never delivered to `group` from any of `streams`,
    /// blocking up to `block` if none are available. Delivered entries stay
    /// pending for the group until acknowledged.
    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError>;

    /// Acknowledge an entry for a group, removing it from the pending list.
    fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), TransportError>;

    /// Number of delivered-but-unacknowledged entries for a group.
    fn pending_count(&self, stream: &str, group: &str) -> Result<u64, TransportError>;

    fn stream_info(&self, stream: &str) -> Result<StreamInfo, TransportError>;

    /// Whether the connection is open and usable.
    fn is_ready(&self) -> bool;

    /// Close the connection. Further calls fail with `TransportError::Closed`.
    fn close(&self) -> Result<(), TransportError>;
}
