//! First enrichment stage: tenant key, timestamps, sequence numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use beacon_core::{DataCategory, EventProperties, EventProperty};

use super::{fields, EventDecorator};
use crate::platform::Clock;

/// Stamps the fields every event must carry: `iKey` from the logger's
/// tenant token, the submission timestamp when the producer left it zero,
/// a per-logger sequence number, the source, and the SDK version.
pub struct CommonFieldsDecorator {
    tenant_token: String,
    source: String,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl CommonFieldsDecorator {
    /// Creates the stage for one logger.
    #[must_use]
    pub fn new(tenant_token: impl Into<String>, source: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenant_token: tenant_token.into(),
            source: source.into(),
            clock,
            sequence: AtomicU64::new(0),
        }
    }
}

impl EventDecorator for CommonFieldsDecorator {
    fn name(&self) -> &'static str {
        "common-fields"
    }

    fn decorate(&self, event: &mut EventProperties) -> bool {
        if event.timestamp_ms == 0 {
            event.set_timestamp(self.clock.now_ms());
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        let part_b = |value: EventProperty| value.in_category(DataCategory::PartB);
        let _ = event.set_property_with(
            fields::IKEY,
            part_b(EventProperty::new(self.tenant_token.as_str())),
        );
        let _ = event.set_property_with(
            fields::SEQUENCE,
            part_b(EventProperty::new(i64::try_from(seq).unwrap_or(i64::MAX))),
        );
        if !self.source.is_empty() {
            let _ = event.set_property_with(
                fields::SOURCE,
                part_b(EventProperty::new(self.source.as_str())),
            );
        }
        let _ = event.set_property_with(
            fields::SDK_VERSION,
            part_b(EventProperty::new(env!("CARGO_PKG_VERSION"))),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ManualClock;

    #[test]
    fn stamps_timestamp_only_when_zero() {
        let clock = ManualClock::starting_at(5_000);
        let stage = CommonFieldsDecorator::new("t1", "src", clock.clone());

        let mut fresh = EventProperties::new("e").unwrap();
        assert!(stage.decorate(&mut fresh));
        assert_eq!(fresh.timestamp_ms, 5_000);

        let mut preset = EventProperties::new("e").unwrap();
        preset.set_timestamp(42);
        assert!(stage.decorate(&mut preset));
        assert_eq!(preset.timestamp_ms, 42);
    }

    #[test]
    fn sequence_increments_per_logger() {
        let stage = CommonFieldsDecorator::new("t1", "", ManualClock::starting_at(0));
        let read_seq = |event: &EventProperties| match event.property(fields::SEQUENCE) {
            Some(p) => p.value.clone(),
            None => panic!("sequence missing"),
        };
        let mut a = EventProperties::new("a").unwrap();
        let mut b = EventProperties::new("b").unwrap();
        stage.decorate(&mut a);
        stage.decorate(&mut b);
        assert_ne!(read_seq(&a), read_seq(&b));
        // Source is omitted for an empty source string.
        assert!(a.property(fields::SOURCE).is_none());
    }

    #[test]
    fn ikey_carries_tenant_token() {
        let stage = CommonFieldsDecorator::new("tenant-xyz", "", ManualClock::starting_at(0));
        let mut event = EventProperties::new("e").unwrap();
        stage.decorate(&mut event);
        assert_eq!(
            event.property(fields::IKEY).unwrap().value.as_str(),
            Some("tenant-xyz")
        );
    }
}
