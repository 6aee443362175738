//! HTTP transports used by `ServiceClient`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::error::RequestError;
use super::request::{HttpRequest, HttpResponse};

/// Sends one HTTP request and returns the target's response.
///
/// Implementations report any response, success or not, as `Ok`; status
/// handling and retries belong to the client. `Err` is reserved for requests
/// that never got an answer.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError>;
}

/// Transport that replays queued outcomes and records every request.
///
/// Once the queue is empty every call gets the fallback outcome, a
/// `200` with an empty JSON object unless changed with `set_fallback`.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, RequestError>>>,
    fallback: Mutex<Result<HttpResponse, RequestError>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(HttpResponse::new(200, "{}"))),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue one outcome.
    pub fn push(&self, outcome: Result<HttpResponse, RequestError>) -> &Self {
        lock(&self.script).push_back(outcome);
        self
    }

    pub fn push_status(&self, status: u16, body: &str) -> &Self {
        self.push(Ok(HttpResponse::new(status, body)))
    }

    pub fn push_network_error(&self, message: &str) -> &Self {
        self.push(Err(RequestError::Network(message.to_string())))
    }

    /// Outcome used once the queue is exhausted.
    pub fn set_fallback(&self, outcome: Result<HttpResponse, RequestError>) {
        *lock(&self.fallback) = outcome;
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        lock(&self.requests).last().cloned()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        lock(&self.requests).push(request.clone());
        match lock(&self.script).pop_front() {
            Some(outcome) => outcome,
            None => lock(&self.fallback).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(feature = "http")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "http")]
mod reqwest_transport {
    use reqwest::blocking::Client;

    use super::HttpTransport;
    use crate::client::error::RequestError;
    use crate::client::request::{HttpRequest, HttpResponse, Method};

    /// Blocking transport backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, RequestError> {
            let client = Client::builder()
                .build()
                .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
            Ok(Self { client })
        }

        /// Use a preconfigured client (proxies, TLS roots, pools).
        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    impl HttpTransport for ReqwestTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self
                .client
                .request(method, request.url.as_str())
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
                builder = builder.body(bytes);
            }

            let response = builder.send().map_err(network_error)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().map_err(network_error)?.to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }

    fn network_error(err: reqwest::Error) -> RequestError {
        if err.is_builder() {
            return RequestError::InvalidRequest(err.to_string());
        }
        if err.is_timeout() {
            return RequestError::Network(format!("timed out: {}", err));
        }
        RequestError::Network(err.to_string())
    }
}
