//! C-style call dispatch: one entry point, a handle table, packed events.
//!
//! This is the safe modeling of the flat ABI embedders bind against: a
//! single [`api_call`] dispatching on [`ApiCall`], a process-wide handle
//! table derived by hashing the configuration string (linear probing past
//! live handles), and events arriving as a [`EvtProp`] array terminated by
//! a `Null` entry. Raw pointer marshalling stays outside this crate; data
//! crosses the boundary already owned.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{
    fnv1a_hash, ContextScope, EventProperties, EventProperty, PiiKind, PropertyValue, TimeTicks,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BeaconConfig;
use crate::enrich::fields;
use crate::error::OpenError;
use crate::factory;
use crate::manager::{LogManager, ManagerDeps};

/// Operation selector for [`api_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCall {
    /// Library load notification (unsupported).
    Load,
    /// Library unload notification (unsupported).
    Unload,
    /// Open a client from a configuration string.
    Open,
    /// Close a client handle.
    Close,
    /// Reconfigure a live client (unsupported).
    Config,
    /// Log one packed event.
    Log,
    /// Pause transmission.
    Pause,
    /// Resume transmission.
    Resume,
    /// Force an upload pass.
    Upload,
    /// Flush to quiescence.
    Flush,
    /// Exchange version strings.
    Version,
}

/// Stable status codes, errno-flavored like the original flat ABI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    /// Success.
    Ok = 0,
    /// Unspecified failure.
    Fail = -1,
    /// Bad argument or malformed configuration (EFAULT).
    BadAddress = 14,
    /// Unknown handle (ENOENT).
    NotFound = 2,
    /// An instance with this configuration is already open (EALREADY).
    Already = 114,
    /// Operation not supported (ENOTSUP).
    NotSupported = 95,
}

impl ApiStatus {
    /// The raw `i32` an ABI shim would return.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Value of one packed event property. `Null` terminates the array.
#[derive(Debug, Clone, PartialEq)]
pub enum EvtValue {
    /// Array terminator.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int64(i64),
    /// Double.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Timestamp in ticks.
    Time(TimeTicks),
    /// GUID.
    Guid(Uuid),
    /// String array.
    StringArray(Vec<String>),
    /// Integer array.
    Int64Array(Vec<i64>),
    /// Double array.
    DoubleArray(Vec<f64>),
    /// GUID array.
    GuidArray(Vec<Uuid>),
}

/// One entry of the packed property array.
#[derive(Debug, Clone, PartialEq)]
pub struct EvtProp {
    /// Property name; well-known names route (see [`api_call`] Log).
    pub name: String,
    /// Tagged value.
    pub value: EvtValue,
    /// PII annotation.
    pub pii: PiiKind,
}

impl EvtProp {
    /// A named property with no PII annotation.
    #[must_use]
    pub fn new(name: impl Into<String>, value: EvtValue) -> Self {
        Self {
            name: name.into(),
            value,
            pii: PiiKind::None,
        }
    }

    /// The array terminator.
    #[must_use]
    pub fn null() -> Self {
        Self {
            name: String::new(),
            value: EvtValue::Null,
            pii: PiiKind::None,
        }
    }
}

/// Call payload. Owned data only; no pointers cross this boundary.
#[derive(Debug, Default)]
pub enum ApiData {
    /// Nothing.
    #[default]
    None,
    /// Configuration string: JSON iff it starts with `{`, else a raw
    /// tenant token.
    Config(String),
    /// Packed event properties, `Null`-terminated.
    Props(Vec<EvtProp>),
    /// Version string; out-parameter for [`ApiCall::Version`].
    Version(String),
}

/// Mutable call context, mirroring the flat ABI's struct.
#[derive(Debug)]
pub struct ApiContext {
    /// Which operation to perform.
    pub call: ApiCall,
    /// Client handle; set by `Open`, consumed by everything else.
    pub handle: u64,
    /// Call payload.
    pub data: ApiData,
    /// Raw status of the last dispatch (mirrors the return value).
    pub result: i32,
}

impl ApiContext {
    /// Context for an `Open` call.
    #[must_use]
    pub fn open(config: impl Into<String>) -> Self {
        Self {
            call: ApiCall::Open,
            handle: 0,
            data: ApiData::Config(config.into()),
            result: 0,
        }
    }

    /// Context for a `Log` call.
    #[must_use]
    pub fn log(handle: u64, props: Vec<EvtProp>) -> Self {
        Self {
            call: ApiCall::Log,
            handle,
            data: ApiData::Props(props),
            result: 0,
        }
    }

    /// Context for a data-less call (`Close`, `Pause`, ...).
    #[must_use]
    pub fn simple(call: ApiCall, handle: u64) -> Self {
        Self {
            call,
            handle,
            data: ApiData::None,
            result: 0,
        }
    }
}

struct CapiClient {
    config_string: String,
    fingerprint: u64,
    manager: Arc<LogManager>,
}

static CLIENTS: Lazy<Mutex<HashMap<u64, CapiClient>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The single dispatch entry point. Returns the status and mirrors it
/// into `ctx.result`.
pub fn api_call(ctx: &mut ApiContext) -> ApiStatus {
    let status = dispatch(ctx);
    ctx.result = status.code();
    status
}

fn dispatch(ctx: &mut ApiContext) -> ApiStatus {
    match ctx.call {
        ApiCall::Open => open(ctx),
        ApiCall::Close => close(ctx),
        ApiCall::Log => log(ctx),
        ApiCall::Pause => with_client(ctx.handle, |manager| {
            manager.pause_transmission();
            ApiStatus::Ok
        }),
        ApiCall::Resume => with_client(ctx.handle, |manager| {
            manager.resume_transmission();
            ApiStatus::Ok
        }),
        ApiCall::Upload => with_client(ctx.handle, |manager| {
            manager.upload_now();
            ApiStatus::Ok
        }),
        ApiCall::Flush => with_client(ctx.handle, |manager| {
            if manager.flush() {
                ApiStatus::Ok
            } else {
                ApiStatus::Fail
            }
        }),
        ApiCall::Version => {
            ctx.data = ApiData::Version(env!("CARGO_PKG_VERSION").to_string());
            ApiStatus::Ok
        }
        ApiCall::Load | ApiCall::Unload | ApiCall::Config => ApiStatus::NotSupported,
    }
}

fn with_client(handle: u64, f: impl FnOnce(&LogManager) -> ApiStatus) -> ApiStatus {
    let manager = {
        let clients = CLIENTS.lock();
        match clients.get(&handle) {
            Some(client) => client.manager.clone(),
            None => return ApiStatus::NotFound,
        }
    };
    f(&manager)
}

fn open(ctx: &mut ApiContext) -> ApiStatus {
    let ApiData::Config(config_string) = &ctx.data else {
        return ApiStatus::BadAddress;
    };
    if config_string.is_empty() {
        return ApiStatus::BadAddress;
    }

    let mut clients = CLIENTS.lock();
    // Derive the handle from the config string; probe past live handles
    // so a collision never reuses one.
    let mut handle = fnv1a_hash(config_string.as_bytes());
    loop {
        match clients.get(&handle) {
            Some(existing) if existing.config_string == *config_string => {
                return ApiStatus::Already;
            }
            Some(_) => handle = handle.wrapping_add(1),
            None => break,
        }
    }

    let config = if config_string.starts_with('{') {
        match BeaconConfig::from_json(config_string) {
            Ok(config) => config,
            Err(e) => {
                debug!(error = %e, "open rejected: bad configuration");
                return ApiStatus::BadAddress;
            }
        }
    } else {
        BeaconConfig::from_token(config_string, handle)
    };
    let fingerprint = config.fingerprint();
    let manager = match factory::create_log_manager_with(config, ManagerDeps::standard()) {
        Ok(manager) => manager,
        Err(OpenError::AlreadyOpen) => return ApiStatus::Already,
        Err(e) => {
            debug!(error = %e, "open failed");
            return ApiStatus::BadAddress;
        }
    };
    clients.insert(
        handle,
        CapiClient {
            config_string: config_string.clone(),
            fingerprint,
            manager,
        },
    );
    ctx.handle = handle;
    ApiStatus::Ok
}

fn close(ctx: &ApiContext) -> ApiStatus {
    let removed = CLIENTS.lock().remove(&ctx.handle);
    match removed {
        Some(client) => {
            factory::release_log_manager(client.fingerprint);
            ApiStatus::Ok
        }
        None => ApiStatus::NotFound,
    }
}

fn property_value(value: EvtValue) -> Option<PropertyValue> {
    match value {
        EvtValue::Null => None,
        EvtValue::Bool(v) => Some(PropertyValue::Bool(v)),
        EvtValue::Int64(v) => Some(PropertyValue::Int64(v)),
        EvtValue::Double(v) => Some(PropertyValue::Double(v)),
        EvtValue::String(v) => Some(PropertyValue::String(v)),
        EvtValue::Time(v) => Some(PropertyValue::TimeTicks(v)),
        EvtValue::Guid(v) => Some(PropertyValue::Guid(v)),
        EvtValue::StringArray(v) => Some(PropertyValue::StringArray(v)),
        EvtValue::Int64Array(v) => Some(PropertyValue::Int64Array(v)),
        EvtValue::DoubleArray(v) => Some(PropertyValue::DoubleArray(v)),
        EvtValue::GuidArray(v) => Some(PropertyValue::GuidArray(v)),
    }
}

fn log(ctx: &mut ApiContext) -> ApiStatus {
    let manager = {
        let clients = CLIENTS.lock();
        match clients.get(&ctx.handle) {
            Some(client) => client.manager.clone(),
            None => return ApiStatus::NotFound,
        }
    };
    let ApiData::Props(props) = &ctx.data else {
        return ApiStatus::BadAddress;
    };

    let mut event_name: Option<String> = None;
    let mut tenant_token: Option<String> = None;
    let mut source = String::new();
    let mut parsed: Vec<(String, EventProperty)> = Vec::new();
    for prop in props {
        if prop.value == EvtValue::Null {
            break;
        }
        match (&prop.name[..], &prop.value) {
            ("name", EvtValue::String(v)) => event_name = Some(v.clone()),
            (fields::IKEY, EvtValue::String(v)) => tenant_token = Some(v.clone()),
            (fields::SOURCE, EvtValue::String(v)) => source = v.clone(),
            _ => {
                if let Some(value) = property_value(prop.value.clone()) {
                    parsed.push((
                        prop.name.clone(),
                        EventProperty::tagged(value, prop.pii),
                    ));
                }
            }
        }
    }

    let Some(tenant_token) = tenant_token else {
        return ApiStatus::BadAddress;
    };
    let Some(event_name) = event_name else {
        return ApiStatus::BadAddress;
    };
    let mut event = match EventProperties::new(event_name) {
        Ok(event) => event,
        Err(_) => return ApiStatus::BadAddress,
    };
    for (name, property) in parsed {
        if event.set_property_with(&name, property).is_err() {
            warn!(name = %name, "packed property name invalid, skipped");
        }
    }

    // Privacy: this surface never grants guests the host context, even
    // when the configuration asks for scope All.
    let mut scope = manager.config().scope();
    if scope == ContextScope::All || scope == ContextScope::Current {
        scope = ContextScope::None;
    }
    let logger = manager.get_logger(&tenant_token, &source, scope);
    match logger.log_event(event) {
        Ok(()) => ApiStatus::Ok,
        Err(e) => {
            debug!(error = %e, "packed event not accepted");
            ApiStatus::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_token(token: &str) -> u64 {
        let mut ctx = ApiContext::open(token);
        assert_eq!(api_call(&mut ctx), ApiStatus::Ok);
        assert_eq!(ctx.result, 0);
        ctx.handle
    }

    fn close_handle(handle: u64) {
        let mut ctx = ApiContext::simple(ApiCall::Close, handle);
        assert_eq!(api_call(&mut ctx), ApiStatus::Ok);
    }

    fn packed_event(token: &str) -> Vec<EvtProp> {
        vec![
            EvtProp::new("name", EvtValue::String("capi.probe".into())),
            EvtProp::new(fields::IKEY, EvtValue::String(token.into())),
            EvtProp::new("count", EvtValue::Int64(3)),
            EvtProp::null(),
        ]
    }

    #[test]
    fn open_log_close_roundtrip() {
        let handle = open_token("capi-roundtrip-token");
        let mut ctx = ApiContext::log(handle, packed_event("capi-roundtrip-token"));
        assert_eq!(api_call(&mut ctx), ApiStatus::Ok);
        close_handle(handle);
    }

    #[test]
    fn duplicate_open_reports_already() {
        let handle = open_token("capi-already-token");
        let mut dup = ApiContext::open("capi-already-token");
        assert_eq!(api_call(&mut dup), ApiStatus::Already);
        close_handle(handle);
    }

    #[test]
    fn unknown_handle_reports_not_found() {
        let mut ctx = ApiContext::simple(ApiCall::Pause, 0xdead_beef);
        assert_eq!(api_call(&mut ctx), ApiStatus::NotFound);
        assert_eq!(ctx.result, 2);
    }

    #[test]
    fn empty_config_is_bad_address() {
        let mut ctx = ApiContext::open("");
        assert_eq!(api_call(&mut ctx), ApiStatus::BadAddress);
    }

    #[test]
    fn malformed_json_is_bad_address() {
        let mut ctx = ApiContext::open("{not-json");
        assert_eq!(api_call(&mut ctx), ApiStatus::BadAddress);
    }

    #[test]
    fn unsupported_ops_report_notsup() {
        for call in [ApiCall::Load, ApiCall::Unload, ApiCall::Config] {
            let mut ctx = ApiContext::simple(call, 0);
            assert_eq!(api_call(&mut ctx), ApiStatus::NotSupported);
        }
    }

    #[test]
    fn version_returns_semver() {
        let mut ctx = ApiContext::simple(ApiCall::Version, 0);
        assert_eq!(api_call(&mut ctx), ApiStatus::Ok);
        let ApiData::Version(version) = ctx.data else {
            panic!("version data expected");
        };
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn log_without_ikey_is_bad_address() {
        let handle = open_token("capi-noikey-token");
        let props = vec![
            EvtProp::new("name", EvtValue::String("capi.probe".into())),
            EvtProp::null(),
        ];
        let mut ctx = ApiContext::log(handle, props);
        assert_eq!(api_call(&mut ctx), ApiStatus::BadAddress);
        close_handle(handle);
    }

    #[test]
    fn null_terminator_stops_unpacking() {
        let handle = open_token("capi-null-token");
        let props = vec![
            EvtProp::new("name", EvtValue::String("capi.probe".into())),
            EvtProp::new(fields::IKEY, EvtValue::String("capi-null-token".into())),
            EvtProp::null(),
            // Everything after the terminator must be ignored, including
            // a second iKey.
            EvtProp::new(fields::IKEY, EvtValue::String("other".into())),
        ];
        let mut ctx = ApiContext::log(handle, props);
        assert_eq!(api_call(&mut ctx), ApiStatus::Ok);
        close_handle(handle);
    }

    #[test]
    fn handles_never_collide() {
        let count = 256;
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            handles.push(open_token(&format!("capi-fleet-token-{i}")));
        }
        let mut unique = handles.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), count);

        // Closing one handle leaves the others live.
        close_handle(handles[0]);
        for &handle in &handles[1..] {
            let mut ctx = ApiContext::simple(ApiCall::Pause, handle);
            assert_eq!(api_call(&mut ctx), ApiStatus::Ok);
        }
        for &handle in &handles[1..] {
            close_handle(handle);
        }
    }
}
