//! Event bus - durable, at-least-once fan-out between services.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 EventBus (one per service)                   │
//! │  - publish() / publish_batch()      → publish connection    │
//! │  - subscribe() / subscribe_many()   → handler table         │
//! │  - consume loop thread              → consume connection    │
//! │      read_group → handlers (retry) → ack                     │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   StreamTransport trait                      │
//! │  append / append_batch / create_group / read_group / ack    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌──────────────────┐              ┌─────────────────────────┐
//! │ InMemoryStreams  │              │  Redis Streams client   │
//! │   (included)     │              │       (external)        │
//! └──────────────────┘              └─────────────────────────┘
//! ```
//!
//! ## Delivery contract
//!
//! - Every event is written once to `<prefix><event_type>`, trimmed to a
//!   bounded length. The log is a buffer, not an archive.
//! - Each subscribing service has one consumer group per stream; process
//!   instances of the same service share the group's deliveries.
//! - Every handler registered for the event's type runs, one after another.
//!   A failing handler is retried with linear backoff; once every handler
//!   has succeeded or given up, the entry is acknowledged.
//! - Duplicates are possible after a crash (at-least-once), never in normal
//!   operation.

mod error;
mod event;
mod event_bus;
mod in_memory;
mod subscription;
mod transport;
mod typed;

pub use error::{BusError, HandlerError};
pub use event::{BatchEvent, Event, PublishOptions};
pub use event_bus::{BusConfig, BusStats, EventBus, DEAD_LETTER_TARGET};
pub use in_memory::InMemoryStreams;
pub use subscription::{Handler, Subscription};
pub use transport::{AppendRequest, StreamEntry, StreamInfo, StreamTransport, TransportError};
pub use typed::{DecoderTable, TypedEvent};
