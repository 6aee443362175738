//! The immutable event envelope exchanged between services.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A fact announced by one service and consumed by any number of others.
///
/// The `id` and `timestamp` are stamped by the bus at publish time, so there
/// is no public constructor. Subscribers only ever read events; once built an
/// event is never mutated.
///
/// On the wire an event is a single JSON object:
///
/// ```json
/// {
///   "id": "5f0c...",
///   "type": "order.created",
///   "payload": { "orderId": "A1" },
///   "timestamp": "2024-05-01T12:00:00.000Z",
///   "source": "orders",
///   "correlationId": "req-42"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    payload: Value,
    timestamp: String,
    source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<HashMap<String, String>>,
}

impl Event {
    /// Stamp a fresh event. Only the bus calls this.
    pub(crate) fn stamp(
        event_type: &str,
        payload: Value,
        source: &str,
        options: PublishOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source: source.to_string(),
            correlation_id: options.correlation_id,
            metadata: options.metadata,
        }
    }

    /// Globally unique id, assigned at publish time.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Topic this event was published under (e.g. `"order.created"`).
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The raw JSON payload. Its shape is a contract between producer and
    /// consumer; the bus never inspects it.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// ISO-8601 publish time (UTC, millisecond precision).
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Publish time parsed back into a `DateTime`, if well formed.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Name of the publishing service.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&HashMap<String, String>> {
        self.metadata.as_ref()
    }

    /// Look up a single metadata entry.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }

    /// Deserialize the payload into a typed struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Serialize to the JSON body stored in a stream entry.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an event from a stream entry body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Optional context attached to a published event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub correlation_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagate a causal chain id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// One element of a `publish_batch` call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    pub event_type: String,
    pub payload: Value,
    pub options: PublishOptions,
}

impl BatchEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            options: PublishOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }
}
