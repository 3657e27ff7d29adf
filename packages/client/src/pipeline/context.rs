//! Upload context: the unit of work flowing from the batcher through the
//! transport and back to the controller.

use std::collections::HashMap;

use beacon_core::EventLatency;

use crate::http::{HttpRequest, HttpResponse};
use crate::storage::RecordId;

/// One batch in flight: the request, the records it bundles, and the
/// response once the transport delivers it.
///
/// Born when the batcher produces a payload; dies after `request_done`
/// when the controller has applied the response to storage.
#[derive(Debug)]
pub struct UploadContext {
    /// Unique request id (mirrors `http_request.id`).
    pub http_request_id: String,
    /// Tenant this batch bills to. Batches are single-tenant; the
    /// `package_ids` map keys by tenant for wire compatibility.
    pub tenant_token: String,
    /// Latency class of every bundled record.
    pub latency: EventLatency,
    /// Ids of the records bundled into the payload.
    pub record_ids: Vec<RecordId>,
    /// Tenant → package sequence number.
    pub package_ids: HashMap<String, u64>,
    /// The owned request; taken by the transport at send time.
    pub http_request: Option<HttpRequest>,
    /// Filled on completion.
    pub http_response: Option<HttpResponse>,
    /// When the request was handed to the transport (epoch ms).
    pub submit_time_ms: u64,
    /// Wall time from submit to completion.
    pub duration_ms: u64,
}

impl UploadContext {
    /// Wraps a freshly built request.
    #[must_use]
    pub fn new(
        tenant_token: String,
        latency: EventLatency,
        record_ids: Vec<RecordId>,
        package_id: u64,
        request: HttpRequest,
    ) -> Self {
        let mut package_ids = HashMap::new();
        package_ids.insert(tenant_token.clone(), package_id);
        Self {
            http_request_id: request.id.clone(),
            tenant_token,
            latency,
            record_ids,
            package_ids,
            http_request: Some(request),
            http_response: None,
            submit_time_ms: 0,
            duration_ms: 0,
        }
    }

    /// The batcher key this context serializes under.
    #[must_use]
    pub fn pair(&self) -> (String, EventLatency) {
        (self.tenant_token.clone(), self.latency)
    }
}
