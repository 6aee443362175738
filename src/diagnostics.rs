//! HTTP diagnostics for a service process.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /health` returns
//!   `{ "ok": true, "service": "...", "bus": { "connected": true, "stats": {...} }, "circuits": { "reviews": "closed" } }`.
//!   The status is `503` when the bus has lost its connection.
//!
//! ## Example
//!
//! ```ignore
//! let diagnostics = Diagnostics::new("bookings")
//!     .with_bus(bus.clone())
//!     .with_registry(registry.clone());
//!
//! // Compose with the service's own routes
//! let app = diagnostics::router(diagnostics.clone()).merge(api_routes);
//!
//! // Or serve directly
//! diagnostics::serve(diagnostics, "0.0.0.0:3000").await?;
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::bus::{BusStats, EventBus, StreamTransport};
use crate::client::ServiceRegistry;

/// What the health route needs to know about an event bus.
pub trait BusStatus: Send + Sync {
    fn is_connected(&self) -> bool;
    fn stats(&self) -> BusStats;
}

impl<T: StreamTransport + 'static> BusStatus for EventBus<T> {
    fn is_connected(&self) -> bool {
        EventBus::is_connected(self)
    }

    fn stats(&self) -> BusStats {
        EventBus::stats(self)
    }
}

/// Shared state behind the diagnostics routes.
#[derive(Clone)]
pub struct Diagnostics {
    service_name: String,
    bus: Option<Arc<dyn BusStatus>>,
    registry: Option<Arc<ServiceRegistry>>,
}

impl Diagnostics {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            bus: None,
            registry: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn BusStatus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Health report as served by `GET /health`.
    pub fn report(&self) -> Value {
        let bus = self.bus.as_ref().map(|bus| {
            json!({
                "connected": bus.is_connected(),
                "stats": bus.stats(),
            })
        });
        let circuits = self
            .registry
            .as_ref()
            .map(|registry| json!(registry.circuit_states()))
            .unwrap_or_else(|| json!({}));

        json!({
            "ok": self.is_healthy(),
            "service": self.service_name,
            "bus": bus,
            "circuits": circuits,
        })
    }

    /// Healthy unless an attached bus is disconnected. Open circuits
    /// describe downstream services and do not fail this process's check.
    pub fn is_healthy(&self) -> bool {
        self.bus.as_ref().map_or(true, |bus| bus.is_connected())
    }
}

/// Build an axum `Router` serving the diagnostics routes.
pub fn router(diagnostics: Diagnostics) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(diagnostics)
}

/// Serve the diagnostics routes at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve(diagnostics: Diagnostics, addr: &str) -> Result<(), std::io::Error> {
    let app = router(diagnostics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health_handler(State(diagnostics): State<Diagnostics>) -> impl IntoResponse {
    let status = if diagnostics.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(diagnostics.report()))
}
