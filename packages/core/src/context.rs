//! Semantic context: ambient key/value state merged into outgoing events.
//!
//! A LogManager owns one host-level context; every logger owns a private
//! one. [`ContextScope`] decides whether a logger sees the host map at all,
//! which is how guest modules are kept from reading host state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::property::{EventProperty, PiiKind};

/// Whether a logger inherits the host LogManager's semantic context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextScope {
    /// Inherit the host context (default for first-party loggers).
    #[default]
    Current,
    /// Explicitly inherit the host context.
    All,
    /// Guest: never merge host context.
    None,
    /// Guest with a private context of its own; host context is not merged.
    Empty,
}

impl ContextScope {
    /// Parses the configuration-string form of a scope.
    ///
    /// Accepts the long config constants (`"CONTEXT_SCOPE_ALL"`) and the
    /// short wire forms (`"*"`, `"-"`, `""`).
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "CONTEXT_SCOPE_ALL" | "*" => Self::All,
            "CONTEXT_SCOPE_NONE" | "-" => Self::None,
            "CONTEXT_SCOPE_EMPTY" | "" => Self::Empty,
            _ => Self::Current,
        }
    }

    /// `true` when the host context is merged into events at this scope.
    #[must_use]
    pub fn merges_host_context(self) -> bool {
        matches!(self, Self::Current | Self::All)
    }
}

/// Reserved context field names (common schema).
pub mod fields {
    /// Application identifier.
    pub const APP_ID: &str = "AppInfo.Id";
    /// Application version.
    pub const APP_VERSION: &str = "AppInfo.Version";
    /// Stable device identifier.
    pub const DEVICE_ID: &str = "DeviceInfo.Id";
    /// Operating system name.
    pub const OS_NAME: &str = "DeviceInfo.OsName";
    /// Operating system version.
    pub const OS_VERSION: &str = "DeviceInfo.OsVersion";
    /// Network cost class as reported by the platform.
    pub const NETWORK_COST: &str = "DeviceInfo.NetworkCost";
    /// Network type (wired, wifi, wwan).
    pub const NETWORK_TYPE: &str = "DeviceInfo.NetworkType";
    /// Authenticated user identifier.
    pub const USER_ID: &str = "UserInfo.Id";
    /// User language tag, e.g. `en-US`.
    pub const USER_LANGUAGE: &str = "UserInfo.Language";
    /// User time zone offset.
    pub const USER_TIMEZONE: &str = "UserInfo.TimeZone";
}

/// Ordered key/value map of ambient event state.
///
/// Cheap to clone (used as a snapshot at enrichment time). Later writers
/// win; merging a logger context over a host context overrides key-by-key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticContext {
    values: BTreeMap<String, EventProperty>,
}

impl SemanticContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a context value.
    pub fn set(&mut self, key: impl Into<String>, property: impl Into<EventProperty>) {
        self.values.insert(key.into(), property.into());
    }

    /// Removes a context value.
    pub fn remove(&mut self, key: &str) -> Option<EventProperty> {
        self.values.remove(key)
    }

    /// Looks up a context value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EventProperty> {
        self.values.get(key)
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventProperty)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when no entries are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlays `other` on top of this context, key-by-key.
    pub fn merge_from(&mut self, other: &Self) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    // Named setters for the well-known fields.

    /// Sets [`fields::APP_ID`].
    pub fn set_app_id(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::APP_ID, value);
    }

    /// Sets [`fields::APP_VERSION`].
    pub fn set_app_version(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::APP_VERSION, value);
    }

    /// Sets [`fields::DEVICE_ID`].
    pub fn set_device_id(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::DEVICE_ID, value);
    }

    /// Sets [`fields::OS_NAME`].
    pub fn set_os_name(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::OS_NAME, value);
    }

    /// Sets [`fields::OS_VERSION`].
    pub fn set_os_version(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::OS_VERSION, value);
    }

    /// Sets [`fields::USER_ID`] with an `Identity` PII tag.
    pub fn set_user_id(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::USER_ID, EventProperty::tagged(value, PiiKind::Identity));
    }

    /// Sets [`fields::USER_LANGUAGE`].
    pub fn set_user_language(&mut self, value: impl Into<String>) {
        let value: String = value.into();
        self.set(fields::USER_LANGUAGE, value);
    }
}
