//! Third enrichment stage: data inspection (privacy scanning).
//!
//! Runs embedder-supplied inspectors over string and GUID property values
//! and annotates the event with the concerns they raise. The SDK ships no
//! built-in detection rules; it provides the plumbing — inspector
//! registration, the ignored-concern suppression list, a runtime enable
//! switch — and records findings in a reserved Part B property.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_core::{DataCategory, EventProperties, EventProperty, PropertyValue};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{fields, EventDecorator};

/// Kinds of privacy concern an inspector can raise about a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataConcernType {
    /// Formatted content: HTML, MIME, XML and similar.
    Content,
    /// Country or region identifiers.
    DemographicInfoCountryRegion,
    /// Language identifiers.
    DemographicInfoLanguage,
    /// Directory or file-share paths.
    Directory,
    /// Email address outside the organization.
    ExternalEmailAddress,
    /// A field name that implies location data.
    FieldNameImpliesLocation,
    /// File names or reportable extensions.
    FileNameOrExtension,
    /// File-sharing URLs.
    FileSharingUrl,
    /// An in-scope authenticated identifier.
    InScopeIdentifier,
    /// The current user's in-scope identifier.
    InScopeIdentifierActiveUser,
    /// Email address inside the organization.
    InternalEmailAddress,
    /// An IP address.
    IpAddress,
    /// Real-world location data.
    Location,
    /// Machine name.
    MachineName,
    /// An out-of-scope identifier (registry client ids etc.).
    OutOfScopeIdentifier,
    /// A product key.
    PidKey,
    /// URLs carrying secrets (tokens, passwords).
    Security,
    /// Any URL.
    Url,
    /// The current user's alias.
    UserAlias,
    /// User or machine domain.
    UserDomain,
    /// The current user's name or part of it.
    UserName,
}

/// Inspector over string values: `(value, tenant_token) -> concern`.
pub type StringInspector =
    Box<dyn Fn(&str, &str) -> Option<DataConcernType> + Send + Sync>;

/// Inspector over GUID values: `(value, tenant_token) -> concern`.
pub type GuidInspector = Box<dyn Fn(Uuid, &str) -> Option<DataConcernType> + Send + Sync>;

/// Suppression key: `(event_name, field_name, concern)`.
type IgnoredConcern = (String, String, DataConcernType);

/// Privacy-scanner decorator.
pub struct DataInspectorDecorator {
    tenant_token: String,
    enabled: AtomicBool,
    string_inspectors: RwLock<Vec<StringInspector>>,
    guid_inspectors: RwLock<Vec<GuidInspector>>,
    ignored: RwLock<HashSet<IgnoredConcern>>,
}

impl DataInspectorDecorator {
    /// Creates an enabled inspector with no rules registered.
    #[must_use]
    pub fn new(tenant_token: impl Into<String>) -> Self {
        Self {
            tenant_token: tenant_token.into(),
            enabled: AtomicBool::new(true),
            string_inspectors: RwLock::new(Vec::new()),
            guid_inspectors: RwLock::new(Vec::new()),
            ignored: RwLock::new(HashSet::new()),
        }
    }

    /// Turns inspection on or off at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Current enable state.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Registers a custom string-value inspector.
    pub fn add_string_inspector(&self, inspector: StringInspector) {
        self.string_inspectors.write().push(inspector);
    }

    /// Registers a custom GUID-value inspector.
    pub fn add_guid_inspector(&self, inspector: GuidInspector) {
        self.guid_inspectors.write().push(inspector);
    }

    /// Suppresses known concerns for specific `(event, field)` pairs.
    pub fn add_ignored_concerns(
        &self,
        concerns: impl IntoIterator<Item = (String, String, DataConcernType)>,
    ) {
        self.ignored.write().extend(concerns);
    }

    fn inspect_value(&self, value: &PropertyValue, concerns: &mut Vec<DataConcernType>) {
        match value {
            PropertyValue::String(s) => {
                for inspector in self.string_inspectors.read().iter() {
                    if let Some(concern) = inspector(s, &self.tenant_token) {
                        concerns.push(concern);
                    }
                }
            }
            PropertyValue::StringArray(values) => {
                for s in values {
                    for inspector in self.string_inspectors.read().iter() {
                        if let Some(concern) = inspector(s, &self.tenant_token) {
                            concerns.push(concern);
                        }
                    }
                }
            }
            PropertyValue::Guid(guid) => {
                for inspector in self.guid_inspectors.read().iter() {
                    if let Some(concern) = inspector(*guid, &self.tenant_token) {
                        concerns.push(concern);
                    }
                }
            }
            PropertyValue::GuidArray(values) => {
                for guid in values {
                    for inspector in self.guid_inspectors.read().iter() {
                        if let Some(concern) = inspector(*guid, &self.tenant_token) {
                            concerns.push(concern);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

impl EventDecorator for DataInspectorDecorator {
    fn name(&self) -> &'static str {
        "data-inspector"
    }

    fn decorate(&self, event: &mut EventProperties) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let ignored = self.ignored.read();
        let mut annotations: Vec<String> = Vec::new();
        for (field, property) in event.properties() {
            let mut concerns = Vec::new();
            self.inspect_value(&property.value, &mut concerns);
            concerns.sort_by_key(|c| format!("{c:?}"));
            concerns.dedup();
            for concern in concerns {
                let key = (event.name().to_string(), field.to_string(), concern);
                if ignored.contains(&key) {
                    continue;
                }
                annotations.push(format!("{field}:{concern:?}"));
            }
        }
        drop(ignored);
        if !annotations.is_empty() {
            let _ = event.set_property_with(
                fields::PRIVACY_CONCERNS,
                EventProperty::new(annotations).in_category(DataCategory::PartB),
            );
        }
        true
    }
}
