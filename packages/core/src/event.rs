//! In-flight telemetry event: name, scheduling hints, and property bag.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::property::{DataCategory, EventProperty, PiiKind, PropertyValue};

/// Maximum length of an event or property name.
pub const MAX_NAME_LEN: usize = 100;

/// `[A-Za-z][A-Za-z0-9_.]*` — leading letter, then letters, digits, `_`, `.`.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.]*$").expect("static pattern"));

/// Returns `true` if `name` is a legal event or property name.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && NAME_RE.is_match(name)
}

/// Error raised when constructing or mutating an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventError {
    /// The event name is empty, too long, or does not match the name pattern.
    #[error("invalid event name: {0:?}")]
    InvalidEventName(String),
    /// A property name is empty, too long, or does not match the name pattern.
    #[error("invalid property name: {0:?}")]
    InvalidPropertyName(String),
    /// `pop_sample` must lie in `[0, 100]`.
    #[error("pop_sample out of range: {0}")]
    PopSampleOutOfRange(f64),
}

/// Legacy scheduling priority. Maps onto a latency class when the event
/// does not set one explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// No preference; latency governs.
    #[default]
    Unspecified,
    /// Drop the event.
    Off,
    /// Below-normal urgency.
    Low,
    /// Default urgency.
    Normal,
    /// Send soon.
    High,
    /// Send as fast as possible.
    Immediate,
}

/// Scheduling latency class. Higher classes are batched and uploaded first.
///
/// Ordering is meaningful: `Max > RealTime > CostDeferred > Normal > Off`.
/// `Unspecified` sorts lowest and means "resolve from priority or default".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EventLatency {
    /// Not set; resolved at enqueue time.
    #[default]
    Unspecified,
    /// Never upload.
    Off,
    /// Default class.
    Normal,
    /// Upload when the network is cheap.
    CostDeferred,
    /// Upload promptly.
    RealTime,
    /// Bypass batching delays entirely.
    Max,
}

impl From<EventPriority> for EventLatency {
    fn from(priority: EventPriority) -> Self {
        match priority {
            EventPriority::Unspecified => Self::Unspecified,
            EventPriority::Off => Self::Off,
            EventPriority::Low | EventPriority::Normal => Self::Normal,
            EventPriority::High => Self::RealTime,
            EventPriority::Immediate => Self::Max,
        }
    }
}

/// Durability class. Affects eviction order when storage overflows:
/// `Normal` records are evicted before `Critical` ones.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EventPersistence {
    /// Evictable under storage pressure.
    #[default]
    Normal,
    /// Kept as long as possible.
    Critical,
}

/// A structured telemetry event under construction or in flight.
///
/// Property names are validated on insertion; the event name is validated
/// at construction. `timestamp_ms == 0` means "stamp from the clock at
/// enqueue time".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProperties {
    name: String,
    /// Epoch milliseconds; 0 = fill from clock on enqueue.
    pub timestamp_ms: u64,
    /// Legacy priority hint.
    pub priority: EventPriority,
    /// Scheduling latency class.
    pub latency: EventLatency,
    /// Durability class.
    pub persistence: EventPersistence,
    /// Population sampling rate in `[0, 100]`; 100 = always keep.
    pub pop_sample: f64,
    /// Opaque policy bits forwarded to the collector.
    pub policy_bit_flags: u64,
    properties: BTreeMap<String, EventProperty>,
}

impl EventProperties {
    /// Creates an event with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidEventName`] when the name is empty,
    /// longer than [`MAX_NAME_LEN`], or violates the name pattern.
    pub fn new(name: impl Into<String>) -> Result<Self, EventError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(EventError::InvalidEventName(name));
        }
        Ok(Self {
            name,
            timestamp_ms: 0,
            priority: EventPriority::Unspecified,
            latency: EventLatency::Unspecified,
            persistence: EventPersistence::Normal,
            pop_sample: 100.0,
            policy_bit_flags: 0,
            properties: BTreeMap::new(),
        })
    }

    /// The event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the timestamp explicitly (epoch milliseconds).
    pub fn set_timestamp(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }

    /// Sets the legacy priority hint.
    pub fn set_priority(&mut self, priority: EventPriority) {
        self.priority = priority;
    }

    /// Sets the latency class.
    pub fn set_latency(&mut self, latency: EventLatency) {
        self.latency = latency;
    }

    /// Sets the persistence class.
    pub fn set_persistence(&mut self, persistence: EventPersistence) {
        self.persistence = persistence;
    }

    /// Sets the population sampling rate.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::PopSampleOutOfRange`] unless `0 ≤ rate ≤ 100`.
    pub fn set_pop_sample(&mut self, rate: f64) -> Result<(), EventError> {
        if !(0.0..=100.0).contains(&rate) {
            return Err(EventError::PopSampleOutOfRange(rate));
        }
        self.pop_sample = rate;
        Ok(())
    }

    /// Latency class after resolving `Unspecified` through the priority
    /// hint, defaulting to `Normal`.
    #[must_use]
    pub fn effective_latency(&self) -> EventLatency {
        if self.latency != EventLatency::Unspecified {
            return self.latency;
        }
        match EventLatency::from(self.priority) {
            EventLatency::Unspecified => EventLatency::Normal,
            resolved => resolved,
        }
    }

    /// Inserts or replaces a Part C property with no PII annotation.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidPropertyName`] for an illegal name.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Result<(), EventError> {
        self.set_property_with(name, EventProperty::new(value))
    }

    /// Inserts or replaces a property with explicit annotations.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidPropertyName`] for an illegal name.
    pub fn set_property_with(
        &mut self,
        name: impl Into<String>,
        property: impl Into<EventProperty>,
    ) -> Result<(), EventError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(EventError::InvalidPropertyName(name));
        }
        self.properties.insert(name, property.into());
        Ok(())
    }

    /// Removes a property, returning it if present.
    pub fn remove_property(&mut self, name: &str) -> Option<EventProperty> {
        self.properties.remove(name)
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&EventProperty> {
        self.properties.get(name)
    }

    /// All properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &EventProperty)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Properties restricted to one schema category.
    pub fn properties_in(
        &self,
        category: DataCategory,
    ) -> impl Iterator<Item = (&str, &EventProperty)> {
        self.properties
            .iter()
            .filter(move |(_, p)| p.category == category)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Name/value pairs carrying a non-`None` PII annotation.
    pub fn pii_properties(&self) -> impl Iterator<Item = (&str, &EventProperty)> {
        self.properties
            .iter()
            .filter(|(_, p)| p.pii != PiiKind::None)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// `true` when the event carries no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Rough wire cost in bytes: name plus every property name and value.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.name.len()
            + self
                .properties
                .iter()
                .map(|(k, p)| k.len() + p.value.estimated_size())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn rejects_bad_event_names() {
        assert!(EventProperties::new("").is_err());
        assert!(EventProperties::new("9starts_with_digit").is_err());
        assert!(EventProperties::new("has space").is_err());
        assert!(EventProperties::new("a".repeat(101)).is_err());
        assert!(EventProperties::new("app.page_view").is_ok());
    }

    #[test]
    fn rejects_bad_property_names() {
        let mut e = EventProperties::new("ok").unwrap();
        assert_eq!(
            e.set_property("bad name", 1i64),
            Err(EventError::InvalidPropertyName("bad name".into()))
        );
        assert!(e.set_property("good.name_1", 1i64).is_ok());
    }

    #[test]
    fn priority_resolves_latency() {
        let mut e = EventProperties::new("ok").unwrap();
        assert_eq!(e.effective_latency(), EventLatency::Normal);
        e.set_priority(EventPriority::High);
        assert_eq!(e.effective_latency(), EventLatency::RealTime);
        e.set_latency(EventLatency::CostDeferred);
        assert_eq!(e.effective_latency(), EventLatency::CostDeferred);
    }

    #[test]
    fn pop_sample_bounds() {
        let mut e = EventProperties::new("ok").unwrap();
        assert!(e.set_pop_sample(100.0).is_ok());
        assert!(e.set_pop_sample(-1.0).is_err());
        assert!(e.set_pop_sample(100.5).is_err());
    }

    #[test]
    fn latency_ordering_matches_scheduling() {
        assert!(EventLatency::Max > EventLatency::RealTime);
        assert!(EventLatency::RealTime > EventLatency::Normal);
        assert!(EventLatency::Normal > EventLatency::Off);
    }

    proptest! {
        #[test]
        fn valid_names_always_accepted(name in "[A-Za-z][A-Za-z0-9_.]{0,99}") {
            prop_assert!(is_valid_name(&name));
        }

        #[test]
        fn msgpack_roundtrip(ts in 0u64..u64::MAX, flags in 0u64..u64::MAX) {
            let mut e = EventProperties::new("roundtrip").unwrap();
            e.set_timestamp(ts);
            e.policy_bit_flags = flags;
            e.set_property("k", "v").unwrap();
            let bytes = rmp_serde::to_vec(&e).unwrap();
            let back: EventProperties = rmp_serde::from_slice(&bytes).unwrap();
            prop_assert_eq!(e, back);
        }
    }
}
