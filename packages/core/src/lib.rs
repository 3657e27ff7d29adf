//! Beacon Core -- event model, semantic context, and wire codec.
//!
//! This crate provides the foundation layer for the Beacon telemetry SDK:
//!
//! - **Events** ([`event`]): [`EventProperties`], latency/persistence/priority classes, name validation
//! - **Properties** ([`property`]): [`PropertyValue`] sum type, [`PiiKind`], [`DataCategory`]
//! - **Context** ([`context`]): [`SemanticContext`] and [`ContextScope`] guest isolation
//! - **Codec** ([`codec`]): [`EventSerializer`] boundary and the MessagePack default
//! - **Hash** ([`hash`]): FNV-1a utilities for config fingerprints and handles

pub mod codec;
pub mod context;
pub mod event;
pub mod hash;
pub mod property;

// Codec
pub use codec::{CodecError, EventSerializer, MsgPackSerializer, WireEvent};

// Context
pub use context::{ContextScope, SemanticContext};

// Events
pub use event::{
    is_valid_name, EventError, EventLatency, EventPersistence, EventPriority, EventProperties,
    MAX_NAME_LEN,
};

// Hash
pub use hash::{combine_hashes, fnv1a_hash};

// Properties
pub use property::{DataCategory, EventProperty, PiiKind, PropertyValue, TimeTicks};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    #[test]
    fn event_msgpack_roundtrip() {
        let mut event = EventProperties::new("smoke.event").expect("valid name");
        event.set_property("flag", true).expect("valid property");
        let bytes = rmp_serde::to_vec(&event).expect("serialize EventProperties");
        let back: EventProperties = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(event, back);
    }
}
