//! Typed property values attached to telemetry events.
//!
//! [`PropertyValue`] is a closed sum over the value shapes the collector
//! understands; every property additionally carries a [`PiiKind`] privacy
//! annotation and a [`DataCategory`] placement (Part B vs Part C of the
//! common schema). No dynamic dispatch: downstream code matches on the enum.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Privacy classification of a property value.
///
/// Declares what kind of personal data a value may contain. The data
/// inspector and the collector's redaction policy both key off this tag;
/// the SDK itself never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PiiKind {
    /// No privacy-sensitive content.
    None,
    /// An LDAP distinguished name, e.g. `CN=Jeff,OU=Users`.
    DistinguishedName,
    /// Generic data the producer wants scrubbed server-side.
    GenericData,
    /// An IPv4 address.
    Ipv4Address,
    /// An IPv6 address.
    Ipv6Address,
    /// A mail subject line.
    MailSubject,
    /// A phone number.
    PhoneNumber,
    /// A URI query string.
    QueryString,
    /// A SIP address.
    SipAddress,
    /// An SMTP email address.
    SmtpAddress,
    /// An authenticated user identity.
    Identity,
    /// A full URI.
    Uri,
    /// A fully qualified domain name.
    Fqdn,
}

/// Common-schema placement of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataCategory {
    /// Event-custom properties (the default).
    PartC,
    /// Service-defined common-schema properties.
    PartB,
}

/// A point in time expressed in .NET ticks: 100 ns intervals since
/// 1601-01-01T00:00:00Z. Carried opaquely; only the collector converts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeTicks(pub u64);

/// The value of a single event property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// UTF-8 string.
    String(String),
    /// Signed 64-bit integer. Narrower integer setters widen into this.
    Int64(i64),
    /// IEEE-754 double.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// A GUID value.
    Guid(Uuid),
    /// A timestamp in .NET ticks.
    TimeTicks(TimeTicks),
    /// Array of strings.
    StringArray(Vec<String>),
    /// Array of signed 64-bit integers.
    Int64Array(Vec<i64>),
    /// Array of doubles.
    DoubleArray(Vec<f64>),
    /// Array of GUIDs.
    GuidArray(Vec<Uuid>),
}

impl PropertyValue {
    /// Returns the string payload if this value is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Rough wire cost of the value in bytes, used for payload budgeting.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            Self::Int64(_) | Self::Double(_) | Self::TimeTicks(_) => 8,
            Self::Bool(_) => 1,
            Self::Guid(_) => 16,
            Self::StringArray(v) => v.iter().map(String::len).sum(),
            Self::Int64Array(v) => v.len() * 8,
            Self::DoubleArray(v) => v.len() * 8,
            Self::GuidArray(v) => v.len() * 16,
        }
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}

impl From<TimeTicks> for PropertyValue {
    fn from(v: TimeTicks) -> Self {
        Self::TimeTicks(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        Self::StringArray(v)
    }
}

impl From<Vec<i64>> for PropertyValue {
    fn from(v: Vec<i64>) -> Self {
        Self::Int64Array(v)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleArray(v)
    }
}

impl From<Vec<Uuid>> for PropertyValue {
    fn from(v: Vec<Uuid>) -> Self {
        Self::GuidArray(v)
    }
}

/// A property value together with its privacy and schema annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProperty {
    /// The value itself.
    pub value: PropertyValue,
    /// Privacy classification.
    pub pii: PiiKind,
    /// Part B vs Part C placement.
    pub category: DataCategory,
}

impl EventProperty {
    /// Creates a Part C property with no PII annotation.
    #[must_use]
    pub fn new(value: impl Into<PropertyValue>) -> Self {
        Self {
            value: value.into(),
            pii: PiiKind::None,
            category: DataCategory::PartC,
        }
    }

    /// Creates a property with an explicit PII kind (Part C).
    #[must_use]
    pub fn tagged(value: impl Into<PropertyValue>, pii: PiiKind) -> Self {
        Self {
            value: value.into(),
            pii,
            category: DataCategory::PartC,
        }
    }

    /// Moves the property into the given schema category.
    #[must_use]
    pub fn in_category(mut self, category: DataCategory) -> Self {
        self.category = category;
        self
    }
}

macro_rules! impl_property_from {
    ($($ty:ty),* $(,)?) => {$(
        impl From<$ty> for EventProperty {
            fn from(value: $ty) -> Self {
                Self::new(value)
            }
        }
    )*};
}

impl_property_from!(
    String,
    &str,
    i64,
    i32,
    f64,
    bool,
    Uuid,
    TimeTicks,
    Vec<String>,
    Vec<i64>,
    Vec<f64>,
    Vec<Uuid>,
);
