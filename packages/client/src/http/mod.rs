//! HTTP transport boundary.
//!
//! The pipeline only ever sees [`HttpClient`]: one async call that turns a
//! request into a response and never fails at the Rust level — transport
//! problems are encoded in [`HttpResult`] so the retry policy can reason
//! about them uniformly.

pub mod manager;
#[cfg(feature = "reqwest-client")]
pub mod reqwest_client;

use async_trait::async_trait;

/// Case-insensitive multimap of HTTP headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders(Vec<(String, String)>);

impl HttpHeaders {
    /// Empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for a header name, matched case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// An upload request owned by the transport once sent.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Unique id; one per upload context.
    pub id: String,
    /// HTTP method; the pipeline only POSTs.
    pub method: String,
    /// Absolute collector URL.
    pub url: String,
    /// Request headers.
    pub headers: HttpHeaders,
    /// Serialized payload.
    pub body: Vec<u8>,
}

/// Transport-level outcome, independent of the HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpResult {
    /// A response was received; see `status_code`.
    Ok,
    /// The request was cancelled before completion.
    Aborted,
    /// The request could not be constructed or sent (client-side).
    LocalFailure,
    /// The network failed after the request left the client.
    NetworkFailure,
}

/// Response (or failure surrogate) for one request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Transport outcome.
    pub result: HttpResult,
    /// HTTP status code; 0 when no response was received.
    pub status_code: u16,
    /// Response headers.
    pub headers: HttpHeaders,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Successful-transport response with a status code.
    #[must_use]
    pub fn with_status(status_code: u16) -> Self {
        Self {
            result: HttpResult::Ok,
            status_code,
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }

    /// Synthetic response for a cancelled request.
    #[must_use]
    pub fn aborted() -> Self {
        Self {
            result: HttpResult::Aborted,
            status_code: 0,
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }

    /// Synthetic response for a client-side failure.
    #[must_use]
    pub fn local_failure() -> Self {
        Self {
            result: HttpResult::LocalFailure,
            status_code: 0,
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }

    /// Synthetic response for a network failure.
    #[must_use]
    pub fn network_failure() -> Self {
        Self {
            result: HttpResult::NetworkFailure,
            status_code: 0,
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }
}

/// Asynchronous HTTP transport.
///
/// Implementations must be infallible at the call level: every error maps
/// to a response with the matching [`HttpResult`]. Used as
/// `Arc<dyn HttpClient>`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs the request to completion.
    async fn send(&self, request: HttpRequest) -> HttpResponse;
}

/// Transport that refuses everything with a local failure. Used when no
/// concrete client is compiled in; queued records simply stay on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHttpClient;

#[async_trait]
impl HttpClient for NoopHttpClient {
    async fn send(&self, _request: HttpRequest) -> HttpResponse {
        HttpResponse::local_failure()
    }
}
