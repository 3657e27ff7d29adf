//! Wire codec boundary: events in, opaque bytes out.
//!
//! The pipeline treats serialization as a pure function; everything about
//! the collector's wire format hides behind [`EventSerializer`]. The
//! default implementation encodes MessagePack. Batches are framed by simple
//! concatenation: a MessagePack stream of records, which the collector can
//! read value-by-value.

use serde::{Deserialize, Serialize};

use crate::event::{EventLatency, EventPersistence, EventProperties};

/// Codec failure. Serialization of a well-formed event should not fail;
/// deserialization of foreign bytes can.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Encoding failed.
    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Decoding failed.
    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// The unit the serializer writes: an enriched event plus the routing
/// metadata the collector bills by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Tenant token the event is billed under.
    pub tenant_token: String,
    /// Effective latency class at enqueue time.
    pub latency: EventLatency,
    /// Effective persistence class at enqueue time.
    pub persistence: EventPersistence,
    /// The enriched event.
    pub event: EventProperties,
}

/// Converts enriched events to collector payload bytes and back.
///
/// Implementations must be pure: same event, same bytes. The upload
/// pipeline calls `serialize` once per event at enqueue time and stores the
/// result; payloads are assembled from stored blobs without re-encoding.
pub trait EventSerializer: Send + Sync {
    /// MIME type announced in the upload request.
    fn content_type(&self) -> &'static str;

    /// Encodes one event to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the event cannot be represented.
    fn serialize(&self, event: &WireEvent) -> Result<Vec<u8>, CodecError>;

    /// Decodes bytes produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for malformed input.
    fn deserialize(&self, bytes: &[u8]) -> Result<WireEvent, CodecError>;
}

/// MessagePack codec, the default wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl EventSerializer for MsgPackSerializer {
    fn content_type(&self) -> &'static str {
        "application/x-msgpack"
    }

    fn serialize(&self, event: &WireEvent) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec(event)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<WireEvent, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
