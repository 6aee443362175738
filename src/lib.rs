pub mod breaker;
pub mod bus;
pub mod catalog;
pub mod client;
pub mod config;
pub mod telemetry;

#[cfg(feature = "http")]
pub mod diagnostics;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use bus::{
    BatchEvent, BusConfig, BusError, Event, EventBus, HandlerError, InMemoryStreams,
    PublishOptions, StreamTransport, Subscription, TypedEvent,
};
pub use catalog::KnownEvent;
pub use client::{RequestError, RequestOptions, ServiceClient, ServiceClientConfig, ServiceRegistry};
pub use config::{ConfigError, Settings};
