//! Synchronous service-to-service HTTP calls.
//!
//! A `ServiceClient` wraps one downstream service: header propagation,
//! bounded retries, and a circuit breaker. A `ServiceRegistry` holds one
//! client per service name. The wire is pluggable through `HttpTransport`;
//! `ReqwestTransport` (feature `http`) is the production implementation and
//! `ScriptedTransport` replays canned responses for tests.

mod error;
mod registry;
mod request;
mod service_client;
mod transport;

pub use error::RequestError;
pub use registry::ServiceRegistry;
pub use request::{
    HttpRequest, HttpResponse, Method, RequestOptions, AUTHORIZATION_HEADER, AUTH_TOKEN_HEADER,
    CORRELATION_ID_HEADER, SERVICE_NAME_HEADER, USER_ID_HEADER,
};
pub use service_client::{ServiceClient, ServiceClientConfig};
#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
pub use transport::{HttpTransport, ScriptedTransport};
