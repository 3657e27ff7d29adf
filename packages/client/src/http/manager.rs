//! HTTP client manager: bridges the pipeline and the async transport.
//!
//! `send_request` hands ownership of the request to a spawned transport
//! task; whatever happens — response, network failure, cancellation — the
//! task emits exactly one completed context on the `request_done` channel,
//! which the pipeline worker consumes. Cancellation is cooperative via a
//! token per request id.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HttpClient, HttpResponse};
use crate::pipeline::UploadContext;
use crate::platform::Clock;

/// Owns the in-flight request set and the completion routing.
pub struct HttpClientManager {
    client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    done_tx: mpsc::Sender<UploadContext>,
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

impl HttpClientManager {
    /// Creates a manager emitting completions on `done_tx`.
    #[must_use]
    pub fn new(
        client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        done_tx: mpsc::Sender<UploadContext>,
    ) -> Self {
        Self {
            client,
            clock,
            done_tx,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Transfers the context's request to the transport. Must run inside
    /// the pipeline runtime (spawns the transport future).
    pub fn send_request(&self, mut ctx: UploadContext) {
        let Some(request) = ctx.http_request.take() else {
            warn!(id = %ctx.http_request_id, "upload context has no request");
            return;
        };
        let token = CancellationToken::new();
        self.in_flight
            .insert(ctx.http_request_id.clone(), token.clone());
        ctx.submit_time_ms = self.clock.now_ms();

        let client = self.client.clone();
        let clock = self.clock.clone();
        let done_tx = self.done_tx.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let response = tokio::select! {
                () = token.cancelled() => HttpResponse::aborted(),
                response = client.send(request) => response,
            };
            // First completion wins; a duplicate delivery for this id
            // finds the entry gone and is ignored.
            if in_flight.remove(&ctx.http_request_id).is_none() {
                debug!(id = %ctx.http_request_id, "duplicate completion ignored");
                return;
            }
            ctx.duration_ms = clock.now_ms().saturating_sub(ctx.submit_time_ms);
            ctx.http_response = Some(response);
            if done_tx.send(ctx).await.is_err() {
                debug!("pipeline gone, completion dropped");
            }
        });
    }

    /// Requests cancellation of every in-flight upload. Each cancelled
    /// request still completes through `request_done` with an `Aborted`
    /// response so reservations get released. Returns `true` when at
    /// least one request was live.
    pub fn cancel_all_requests(&self) -> bool {
        let mut any = false;
        for entry in self.in_flight.iter() {
            entry.value().cancel();
            any = true;
        }
        any
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::EventLatency;
    use tokio::sync::mpsc;

    use super::*;
    use crate::http::test_support::MockHttpClient;
    use crate::http::{HttpHeaders, HttpRequest, HttpResult};
    use crate::platform::ManualClock;

    fn context(id: &str) -> UploadContext {
        UploadContext::new(
            "tenant1-token".to_string(),
            EventLatency::Normal,
            vec!["r1".to_string(), "r2".to_string()],
            0,
            HttpRequest {
                id: id.to_string(),
                method: "POST".to_string(),
                url: "https://collector.test/".to_string(),
                headers: HttpHeaders::new(),
                body: vec![1, 2, 3],
            },
        )
    }

    #[tokio::test]
    async fn handles_request_flow() {
        let client = Arc::new(MockHttpClient::with_status(200));
        let clock = ManualClock::starting_at(10_000);
        let (done_tx, mut done_rx) = mpsc::channel(4);
        let hcm = HttpClientManager::new(client.clone(), clock.clone(), done_tx);

        let mut ctx = context("req-1");
        ctx.submit_time_ms = 0;
        hcm.send_request(ctx);
        clock.advance_ms(200);

        let done = done_rx.recv().await.expect("completion");
        assert_eq!(done.http_request_id, "req-1");
        let response = done.http_response.as_ref().unwrap();
        assert_eq!(response.result, HttpResult::Ok);
        assert_eq!(response.status_code, 200);
        assert_eq!(done.duration_ms, 200);
        assert_eq!(hcm.in_flight_count(), 0);
        assert_eq!(client.seen_count(), 1);
    }

    #[tokio::test]
    async fn cancel_aborts_requests_but_still_completes() {
        let client = Arc::new(MockHttpClient::with_status(200));
        client.hang_forever();
        let (done_tx, mut done_rx) = mpsc::channel(4);
        let hcm =
            HttpClientManager::new(client.clone(), ManualClock::starting_at(0), done_tx);

        hcm.send_request(context("req-2"));
        // Let the transport task reach its await point.
        tokio::task::yield_now().await;
        assert!(hcm.cancel_all_requests());

        let done = done_rx.recv().await.expect("completion");
        assert_eq!(
            done.http_response.as_ref().unwrap().result,
            HttpResult::Aborted
        );
        assert_eq!(hcm.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn cancel_with_nothing_in_flight_reports_false() {
        let client = Arc::new(MockHttpClient::with_status(200));
        let (done_tx, _done_rx) = mpsc::channel(4);
        let hcm = HttpClientManager::new(client, ManualClock::starting_at(0), done_tx);
        assert!(!hcm.cancel_all_requests());
    }
}
