//! Default [`HttpClient`] over reqwest (rustls).

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{HttpClient, HttpHeaders, HttpRequest, HttpResponse, HttpResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Production transport.
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Builds a client with the SDK's default timeouts.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot initialize.
    pub fn new() -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> HttpResponse {
        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => return HttpResponse::local_failure(),
        };
        let mut builder = self.inner.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        match builder.body(request.body).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let mut headers = HttpHeaders::new();
                for (name, value) in response.headers() {
                    if let Ok(value) = value.to_str() {
                        headers.push(name.as_str(), value);
                    }
                }
                let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                HttpResponse {
                    result: HttpResult::Ok,
                    status_code,
                    headers,
                    body,
                }
            }
            Err(error) => {
                debug!(id = %request.id, %error, "transport error");
                if error.is_builder() || error.is_request() {
                    HttpResponse::local_failure()
                } else {
                    HttpResponse::network_failure()
                }
            }
        }
    }
}
