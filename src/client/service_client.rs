use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::RequestError;
use super::request::{
    HttpRequest, HttpResponse, Method, RequestOptions, AUTHORIZATION_HEADER, AUTH_TOKEN_HEADER,
    CORRELATION_ID_HEADER, SERVICE_NAME_HEADER, USER_ID_HEADER,
};
use super::transport::HttpTransport;
use crate::breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Client tuning. Defaults: 3 attempts, 1 s base retry delay, 10 s timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceClientConfig {
    /// Total attempts per call for retryable failures.
    pub retries: u32,
    /// Base delay; the wait after attempt `n` (zero-based) is `retry_delay * (n + 1)`.
    #[serde(rename = "retry_delay_ms", with = "crate::config::duration_ms")]
    pub retry_delay: Duration,
    /// Per-attempt timeout.
    #[serde(rename = "timeout_ms", with = "crate::config::duration_ms")]
    pub timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ServiceClientConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ServiceClientConfig {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// HTTP client for one downstream service.
///
/// Every call carries `x-service-name`; correlation, auth, and user headers
/// are added only when the caller supplies them. Network errors and 5xx
/// responses are retried with linearly growing delays, 4xx responses are
/// returned at once. The whole retry sequence runs as a single call through
/// this client's circuit breaker, so one exhausted sequence counts as one
/// breaker failure.
///
/// ```
/// use std::sync::Arc;
/// use interlink::client::{RequestOptions, ScriptedTransport, ServiceClient, ServiceClientConfig};
///
/// let transport = Arc::new(ScriptedTransport::new());
/// transport.push_status(200, r#"{"id":"r1","rating":5}"#);
///
/// let reviews = ServiceClient::new(
///     "reviews",
///     "http://reviews:8080",
///     "bookings",
///     ServiceClientConfig::default(),
///     transport.clone(),
/// );
///
/// let review: serde_json::Value = reviews
///     .get("/reviews/r1", RequestOptions::new().with_correlation_id("req-1"))
///     .unwrap();
/// assert_eq!(review["rating"], 5);
///
/// let sent = transport.last_request().unwrap();
/// assert_eq!(sent.url, "http://reviews:8080/reviews/r1");
/// assert_eq!(sent.header("x-service-name"), Some("bookings"));
/// assert_eq!(sent.header("x-correlation-id"), Some("req-1"));
/// ```
pub struct ServiceClient {
    target: String,
    base_url: String,
    service_name: String,
    config: ServiceClientConfig,
    breaker: CircuitBreaker,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("target", &self.target)
            .field("base_url", &self.base_url)
            .field("service_name", &self.service_name)
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl ServiceClient {
    /// `target` names the downstream service; `service_name` is the caller's
    /// own identity, sent as `x-service-name`.
    pub fn new(
        target: impl Into<String>,
        base_url: impl Into<String>,
        service_name: impl Into<String>,
        config: ServiceClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let target = target.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let breaker = CircuitBreaker::new(target.clone(), config.circuit_breaker.clone());
        Self {
            target,
            base_url,
            service_name: service_name.into(),
            config,
            breaker,
            transport,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ServiceClientConfig {
        &self.config
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.request(Method::Get, path, None, options)?.json()
    }

    pub fn post<B, T>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode_body(body)?;
        self.request(Method::Post, path, Some(body), options)?.json()
    }

    pub fn put<B, T>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode_body(body)?;
        self.request(Method::Put, path, Some(body), options)?.json()
    }

    pub fn patch<B, T>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode_body(body)?;
        self.request(Method::Patch, path, Some(body), options)?.json()
    }

    pub fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        self.request(Method::Delete, path, None, options)?.json()
    }

    /// Send a request and return the raw successful response.
    ///
    /// Non-2xx responses come back as `RequestError::Status`.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<HttpResponse, RequestError> {
        let attempts = options.retries.unwrap_or(self.config.retries).max(1);
        let skip_breaker = options.skip_circuit_breaker;
        let request = self.build_request(method, path, body, options);

        if skip_breaker {
            self.send_with_retries(&request, attempts)
        } else {
            self.breaker
                .execute(|| self.send_with_retries(&request, attempts))
        }
    }

    /// Probe `GET /health`, bypassing the breaker and retries.
    pub fn health_check(&self) -> bool {
        let options = RequestOptions::new()
            .skip_circuit_breaker()
            .with_retries(1);
        match self.request(Method::Get, "/health", None, options) {
            Ok(_) => true,
            Err(e) => {
                debug!(target_service = %self.target, error = %e, "health check failed");
                false
            }
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn circuit_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> HttpRequest {
        let mut headers = vec![(SERVICE_NAME_HEADER.to_string(), self.service_name.clone())];
        if let Some(id) = options.correlation_id {
            headers.push((CORRELATION_ID_HEADER.to_string(), id));
        }
        if let Some(token) = options.auth_token {
            headers.push((AUTHORIZATION_HEADER.to_string(), format!("Bearer {}", token)));
            headers.push((AUTH_TOKEN_HEADER.to_string(), token));
        }
        if let Some(user) = options.user_id {
            headers.push((USER_ID_HEADER.to_string(), user));
        }
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        headers.extend(options.headers);

        HttpRequest {
            method,
            url: join_url(&self.base_url, path),
            headers,
            body,
            timeout: options.timeout.unwrap_or(self.config.timeout),
        }
    }

    fn send_with_retries(
        &self,
        request: &HttpRequest,
        attempts: u32,
    ) -> Result<HttpResponse, RequestError> {
        let mut attempt = 0;
        loop {
            let err = match self.send_once(request) {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt + 1 >= attempts {
                warn!(
                    target_service = %self.target,
                    method = %request.method,
                    url = %request.url,
                    attempts,
                    error = %err,
                    "request failed after retries"
                );
                return Err(err);
            }

            let delay = self.config.retry_delay * (attempt + 1);
            debug!(
                target_service = %self.target,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            thread::sleep(delay);
            attempt += 1;
        }
    }

    fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        let response = self.transport.send(request)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(RequestError::Status {
                status: response.status,
                body: response.text(),
            })
        }
    }
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, RequestError> {
    serde_json::to_value(body).map_err(|e| RequestError::InvalidRequest(e.to_string()))
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
