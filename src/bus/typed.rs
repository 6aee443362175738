//! Strongly typed events on top of the payload-agnostic bus.
//!
//! The bus moves opaque JSON. Services that want typed payloads implement
//! [`TypedEvent`] for each payload struct and either subscribe per type with
//! [`EventBus::subscribe_typed`], or decode into an application-level enum
//! through a [`DecoderTable`] keyed by event type.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{BusError, HandlerError};
use super::event::{Event, PublishOptions};
use super::event_bus::EventBus;
use super::subscription::Subscription;
use super::transport::StreamTransport;

/// A payload type bound to one event type string.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use interlink::bus::TypedEvent;
///
/// #[derive(Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct OrderCreated {
///     order_id: String,
/// }
///
/// impl TypedEvent for OrderCreated {
///     const EVENT_TYPE: &'static str = "order.created";
/// }
/// ```
pub trait TypedEvent: Serialize + DeserializeOwned {
    const EVENT_TYPE: &'static str;
}

impl<T: StreamTransport + 'static> EventBus<T> {
    /// Publish a typed payload under its event type.
    pub fn publish_typed<E: TypedEvent>(
        &self,
        payload: &E,
        options: PublishOptions,
    ) -> Result<String, BusError> {
        let payload = serde_json::to_value(payload)?;
        self.publish(E::EVENT_TYPE, payload, options)
    }

    /// Subscribe with a handler that receives the decoded payload.
    ///
    /// A payload that does not decode counts as a handler failure, so it
    /// goes through the usual retry and dead-letter path.
    pub fn subscribe_typed<E, F>(&self, handler: F) -> Result<Subscription, BusError>
    where
        E: TypedEvent + 'static,
        F: Fn(&Event, E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(E::EVENT_TYPE, move |event| {
            let payload = event.decode::<E>()?;
            handler(event, payload)
        })
    }
}

type Decoder<M> = Box<dyn Fn(&Value) -> Result<M, serde_json::Error> + Send + Sync>;

/// Lookup table from event type to a decoder producing an application
/// message type `M` (typically an enum with one variant per event).
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use interlink::bus::{DecoderTable, TypedEvent};
///
/// #[derive(Serialize, Deserialize)]
/// struct BookingCreated { id: String }
/// impl TypedEvent for BookingCreated { const EVENT_TYPE: &'static str = "booking.created"; }
///
/// #[derive(Serialize, Deserialize)]
/// struct BookingCancelled { id: String }
/// impl TypedEvent for BookingCancelled { const EVENT_TYPE: &'static str = "booking.cancelled"; }
///
/// enum BookingMessage {
///     Created(BookingCreated),
///     Cancelled(BookingCancelled),
/// }
///
/// let table = DecoderTable::new()
///     .register(BookingMessage::Created)
///     .register(BookingMessage::Cancelled);
/// assert_eq!(table.event_types(), vec!["booking.cancelled", "booking.created"]);
/// ```
pub struct DecoderTable<M> {
    decoders: HashMap<&'static str, Decoder<M>>,
}

impl<M> Default for DecoderTable<M> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<M: 'static> DecoderTable<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload type and the constructor that wraps it into `M`.
    pub fn register<E, W>(mut self, wrap: W) -> Self
    where
        E: TypedEvent + 'static,
        W: Fn(E) -> M + Send + Sync + 'static,
    {
        self.decoders.insert(
            E::EVENT_TYPE,
            Box::new(move |payload: &Value| E::deserialize(payload).map(&wrap)),
        );
        self
    }

    /// Decode an event. `Ok(None)` means the event type is not in the table.
    pub fn decode(&self, event: &Event) -> Result<Option<M>, HandlerError> {
        match self.decoders.get(event.event_type()) {
            Some(decoder) => Ok(Some(decoder(event.payload())?)),
            None => Ok(None),
        }
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
