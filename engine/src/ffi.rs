//! FFI layer for mobile host integration.
//!
//! This module provides C-compatible functions that can be called from
//! Kotlin, Swift or Dart. All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `d2_*` functions are allocated by Rust
//! - Caller must free them with `d2_string_free`
//! - Store pointers must be freed with `d2_store_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{
    error::Result,
    expression::Context,
    paging::{bounded_pages, page_count, MAX_LISTED_PAGES},
    store::LocalStore,
    validation::{validate, ValidationRule},
    ConfigError, DataStatePropagator, Error, MemoryStore, Record, ResourceType, StoreSnapshot, SyncEvent,
    SyncState,
};
use serde::{de::DeserializeOwned, Serialize};
use std::ffi::{c_char, CStr, CString};

/// Result wrapper for FFI responses.
#[derive(Serialize)]
#[serde(untagged)]
enum FfiResult<T: Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

impl<T: Serialize> From<Result<T>> for FfiResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => FfiResult::ok(value),
            Err(err) => FfiResult::err(err.to_string()),
        }
    }
}

static NUL_BYTES_ERROR: &[u8] = b"{\"error\":\"string contained null bytes\"}\0";

/// Convert a Rust string to a C string pointer.
/// Caller must free with `d2_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CStr::from_bytes_with_nul(NUL_BYTES_ERROR)
            .map(|error| error.to_owned())
            .unwrap_or_default()
            .into_raw(),
    }
}

fn respond<T: Serialize>(result: Result<T>) -> *mut c_char {
    to_c_string(FfiResult::from(result).to_json())
}

fn error_response(message: &str) -> *mut c_char {
    to_c_string(FfiResult::<()>::err(message).to_json())
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Read a required JSON argument.
unsafe fn from_json_arg<T: DeserializeOwned>(ptr: *const c_char, what: &str) -> Result<T> {
    let json = from_c_string(ptr).ok_or_else(|| Error::Serialization(format!("invalid {what}")))?;
    serde_json::from_str(&json).map_err(|e| Error::Serialization(format!("invalid {what}: {e}")))
}

/// Parse a resource name such as `"event"` or `"trackedEntityInstance"`.
unsafe fn resource_arg(ptr: *const c_char) -> Result<ResourceType> {
    let name = from_c_string(ptr).ok_or_else(|| Error::Serialization("invalid resource".into()))?;
    serde_json::from_value(serde_json::Value::String(name.clone()))
        .map_err(|_| Error::Serialization(format!("unknown resource '{name}'")))
}

// ============================================================================
// Store Lifecycle
// ============================================================================

/// Create a new empty store.
///
/// # Returns
/// Pointer to the store. Never null.
///
/// # Safety
/// Caller must free the returned pointer with `d2_store_free`.
#[no_mangle]
pub extern "C" fn d2_store_new() -> *mut MemoryStore {
    Box::into_raw(Box::new(MemoryStore::new()))
}

/// Free a store.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn d2_store_free(store: *mut MemoryStore) {
    if !store.is_null() {
        drop(Box::from_raw(store));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `d2_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn d2_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Records
// ============================================================================

/// Save a record and propagate its state to its ancestors.
///
/// # Arguments
/// - `store`: Store pointer
/// - `record_json`: JSON string of Record
///
/// # Returns
/// JSON list of the ancestor state changes.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - `record_json` must be a valid null-terminated C string
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_upsert(
    store: *mut MemoryStore,
    record_json: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    respond(from_json_arg::<Record>(record_json, "record").and_then(|record| {
        DataStatePropagator::new().save_and_propagate(store, record)
    }))
}

/// Get a record by resource name and identifier.
///
/// # Returns
/// JSON of the record, or `{"ok": null}` if it does not exist.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - `resource` and `uid` must be valid null-terminated C strings
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_get(
    store: *const MemoryStore,
    resource: *const c_char,
    uid: *const c_char,
) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    let uid = match from_c_string(uid) {
        Some(u) => u,
        None => return error_response("invalid uid"),
    };

    respond(resource_arg(resource).and_then(|resource| store.get_by_id(resource, &uid)))
}

/// List records of a resource in a given state.
///
/// # Arguments
/// - `resource`: resource name, e.g. `"event"`
/// - `state`: state name, e.g. `"TO_POST"`
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - `resource` and `state` must be valid null-terminated C strings
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_by_state(
    store: *const MemoryStore,
    resource: *const c_char,
    state: *const c_char,
) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    let state: SyncState = match from_c_string(state)
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s)).ok())
    {
        Some(s) => s,
        None => return error_response("invalid state"),
    };

    respond(resource_arg(resource).and_then(|resource| store.get_by_state(resource, state)))
}

/// Propagate the state of an already stored record to its ancestors.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - `record_json` must be a valid null-terminated C string
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_propagate(
    store: *mut MemoryStore,
    record_json: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    respond(from_json_arg::<Record>(record_json, "record").and_then(|record| {
        crate::propagate_state_change(store, &record)
    }))
}

/// Return every record left in `UPLOADING` to a pending state.
///
/// Call once at startup, before any sync.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_reset_uploading(store: *mut MemoryStore) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    respond(DataStatePropagator::new().reset_all_uploading(store))
}

// ============================================================================
// Persistence
// ============================================================================

/// Export store state as a snapshot.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_export(store: *const MemoryStore) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    if store.in_transaction() {
        return error_response("cannot export while a transaction is open");
    }

    respond(Ok(StoreSnapshot::capture(store)))
}

/// Replace store state with a snapshot.
///
/// # Safety
/// - `store` must be a valid pointer from `d2_store_new`
/// - `snapshot_json` must be a valid null-terminated C string
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_store_import(
    store: *mut MemoryStore,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_response("null store pointer"),
    };

    let json = match from_c_string(snapshot_json) {
        Some(s) => s,
        None => return error_response("invalid snapshot JSON string"),
    };

    let imported = StoreSnapshot::from_json(&json).and_then(|snapshot| {
        let count = snapshot.record_count();
        *store = snapshot.restore()?;
        Ok(count)
    });
    respond(imported)
}

// ============================================================================
// State Machine
// ============================================================================

/// Apply an event to a state.
///
/// # Arguments
/// - `state`: state name, e.g. `"SYNCED"`
/// - `event`: event name, e.g. `"localEdit"`
///
/// # Returns
/// JSON with the next state name.
///
/// # Safety
/// - `state` and `event` must be valid null-terminated C strings
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_state_transition(
    state: *const c_char,
    event: *const c_char,
) -> *mut c_char {
    let parsed = from_c_string(state).zip(from_c_string(event)).and_then(|(state, event)| {
        let state: SyncState = serde_json::from_value(serde_json::Value::String(state)).ok()?;
        let event: SyncEvent = serde_json::from_value(serde_json::Value::String(event)).ok()?;
        Some((state, event))
    });

    match parsed {
        Some((state, event)) => respond(state.transition(event)),
        None => error_response("invalid state or event"),
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Evaluate an expression.
///
/// # Arguments
/// - `expression`: expression source
/// - `context_json`: JSON of Context, or null for no variables
///
/// # Safety
/// - `expression` must be a valid null-terminated C string
/// - `context_json` must be a valid null-terminated C string or null
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_evaluate(
    expression: *const c_char,
    context_json: *const c_char,
) -> *mut c_char {
    let expression = match from_c_string(expression) {
        Some(e) => e,
        None => return error_response("invalid expression string"),
    };

    let ctx = if context_json.is_null() {
        Ok(Context::new())
    } else {
        from_json_arg::<Context>(context_json, "context")
    };

    respond(ctx.and_then(|ctx| crate::expression::evaluate(&expression, &ctx)))
}

/// Check validation rules against a context.
///
/// # Returns
/// JSON list of violations.
///
/// # Safety
/// - `rules_json` and `context_json` must be valid null-terminated C strings
/// - Caller must free returned string with `d2_string_free`
#[no_mangle]
pub unsafe extern "C" fn d2_validate(
    rules_json: *const c_char,
    context_json: *const c_char,
) -> *mut c_char {
    let checked = from_json_arg::<Vec<ValidationRule>>(rules_json, "rules").and_then(|rules| {
        let ctx = from_json_arg::<Context>(context_json, "context")?;
        validate(&rules, &ctx)
    });
    respond(checked)
}

// ============================================================================
// Utility
// ============================================================================

/// Compute the pages needed to download `limit` items.
///
/// # Returns
/// JSON list of pages. Empty when `page_size` or `limit` is not positive,
/// an error when the list would exceed [`MAX_LISTED_PAGES`] entries.
#[no_mangle]
pub extern "C" fn d2_compute_pages(page_size: i64, limit: i64) -> *mut c_char {
    let page_size = usize::try_from(page_size).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);

    let pages = page_count(page_size, limit);
    if pages > MAX_LISTED_PAGES {
        return respond::<()>(Err(ConfigError::TooManyPages {
            pages,
            max: MAX_LISTED_PAGES,
        }
        .into()));
    }
    respond(Ok(bounded_pages(page_size, limit)))
}

/// Install a logging subscriber.
///
/// # Returns
/// `false` if one was already installed.
///
/// # Safety
/// `filter` must be a valid null-terminated C string or null for the default.
#[no_mangle]
pub unsafe extern "C" fn d2_init_logging(filter: *const c_char) -> bool {
    let filter = from_c_string(filter).unwrap_or_else(|| crate::SyncConfig::default().log_filter);
    crate::logging::init(&filter)
}

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn d2_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// Get the snapshot format version.
#[no_mangle]
pub extern "C" fn d2_snapshot_format_version() -> u32 {
    crate::SNAPSHOT_FORMAT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    unsafe fn take(result: *mut c_char) -> serde_json::Value {
        let json = CStr::from_ptr(result).to_str().unwrap().to_string();
        d2_string_free(result);
        serde_json::from_str(&json).unwrap()
    }

    fn record_json(uid: &str, resource: &str, parent: Option<&str>, state: &str) -> CString {
        let parent = parent.map_or("null".to_string(), |p| format!("\"{p}\""));
        c(&format!(
            r#"{{
                "uid": "{uid}",
                "resource": "{resource}",
                "parent": {parent},
                "state": "{state}",
                "payload": {{}},
                "metadata": {{"created": "2024-02-01T00:00:00Z", "lastUpdated": "2024-02-01T00:00:00Z"}}
            }}"#
        ))
    }

    #[test]
    fn ffi_store_lifecycle() {
        unsafe {
            let store = d2_store_new();
            assert!(!store.is_null());
            d2_store_free(store);
        }
    }

    #[test]
    fn ffi_save_propagates() {
        unsafe {
            let store = d2_store_new();

            let tei = record_json("tei1", "trackedEntityInstance", None, "SYNCED");
            let enr = record_json("enr1", "enrollment", Some("tei1"), "SYNCED");
            let ev = record_json("ev1", "event", Some("enr1"), "TO_UPDATE");

            assert_eq!(take(d2_store_upsert(store, tei.as_ptr())), serde_json::json!({"ok": []}));
            // A synced enrollment already marks its tracked entity for update.
            let changes = take(d2_store_upsert(store, enr.as_ptr()));
            assert_eq!(changes["ok"].as_array().unwrap().len(), 1);
            assert_eq!(changes["ok"][0]["uid"], "tei1");

            let changes = take(d2_store_upsert(store, ev.as_ptr()));
            let changes = changes["ok"].as_array().unwrap();
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0]["uid"], "enr1");

            let resource = c("trackedEntityInstance");
            let uid = c("tei1");
            let tei = take(d2_store_get(store, resource.as_ptr(), uid.as_ptr()));
            assert_eq!(tei["ok"]["state"], "TO_UPDATE");

            let state = c("TO_UPDATE");
            let pending = take(d2_store_by_state(store, resource.as_ptr(), state.as_ptr()));
            assert_eq!(pending["ok"].as_array().unwrap().len(), 1);

            let missing = c("nope");
            assert_eq!(
                take(d2_store_get(store, resource.as_ptr(), missing.as_ptr())),
                serde_json::json!({"ok": null})
            );

            d2_store_free(store);
        }
    }

    #[test]
    fn ffi_reset_uploading() {
        unsafe {
            let store = d2_store_new();
            let ev = record_json("ev1", "event", None, "UPLOADING");
            take(d2_store_upsert(store, ev.as_ptr()));

            let changes = take(d2_store_reset_uploading(store));
            assert_eq!(changes["ok"][0]["to"], "TO_POST");

            d2_store_free(store);
        }
    }

    #[test]
    fn ffi_export_import() {
        unsafe {
            let store = d2_store_new();
            let ev = record_json("ev1", "event", None, "TO_POST");
            take(d2_store_upsert(store, ev.as_ptr()));

            let exported = take(d2_store_export(store));
            let snapshot = c(&exported["ok"].to_string());

            let other = d2_store_new();
            let imported = take(d2_store_import(other, snapshot.as_ptr()));
            assert_eq!(imported["ok"], 1);

            let resource = c("event");
            let uid = c("ev1");
            let record = take(d2_store_get(other, resource.as_ptr(), uid.as_ptr()));
            assert_eq!(record["ok"]["state"], "TO_POST");

            d2_store_free(store);
            d2_store_free(other);
        }
    }

    #[test]
    fn ffi_state_transition() {
        unsafe {
            let state = c("SYNCED");
            let event = c("localEdit");
            assert_eq!(
                take(d2_state_transition(state.as_ptr(), event.as_ptr())),
                serde_json::json!({"ok": "TO_UPDATE"})
            );

            let bogus = c("sideways");
            assert!(take(d2_state_transition(state.as_ptr(), bogus.as_ptr()))["error"].is_string());
        }
    }

    #[test]
    fn ffi_evaluate() {
        unsafe {
            let expression = c("#{weight} / (#{height} ^ 2)");
            let ctx = c(r##"{"variables": {"#{weight}": 80, "#{height}": 2}}"##);
            assert_eq!(
                take(d2_evaluate(expression.as_ptr(), ctx.as_ptr())),
                serde_json::json!({"ok": 20.0})
            );

            let bare = c("d2:daysBetween('2016-01-01', '2016-01-31')");
            assert_eq!(
                take(d2_evaluate(bare.as_ptr(), ptr::null())),
                serde_json::json!({"ok": "30"})
            );

            let broken = c("1 +");
            assert!(take(d2_evaluate(broken.as_ptr(), ptr::null()))["error"].is_string());
        }
    }

    #[test]
    fn ffi_validate() {
        unsafe {
            let rules = c(r##"[{
                "uid": "vr1",
                "left": {"expression": "#{a}", "missingValueStrategy": "NEVER_SKIP"},
                "operator": "greater_than",
                "right": {"expression": "#{b}", "missingValueStrategy": "NEVER_SKIP"}
            }]"##);
            let ctx = c(r##"{"variables": {"#{a}": 1, "#{b}": 2}}"##);
            let violations = take(d2_validate(rules.as_ptr(), ctx.as_ptr()));
            assert_eq!(violations["ok"][0]["rule"], "vr1");
        }
    }

    #[test]
    fn ffi_compute_pages() {
        unsafe {
            let pages = take(d2_compute_pages(50, 120));
            let pages = pages["ok"].as_array().unwrap();
            assert_eq!(pages.len(), 3);
            assert_eq!(pages[2]["isLastPage"], true);

            assert_eq!(take(d2_compute_pages(50, -1)), serde_json::json!({"ok": []}));

            let huge = take(d2_compute_pages(1, i64::MAX));
            assert!(huge["error"].as_str().unwrap().contains("maximum"));
        }
    }

    #[test]
    fn ffi_version() {
        unsafe {
            let version = CStr::from_ptr(d2_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
        assert_eq!(d2_snapshot_format_version(), crate::SNAPSHOT_FORMAT_VERSION);
    }

    #[test]
    fn ffi_error_handling() {
        unsafe {
            // Null store pointer
            let resource = c("event");
            let uid = c("ev1");
            let result = take(d2_store_get(ptr::null(), resource.as_ptr(), uid.as_ptr()));
            assert!(result["error"].is_string());

            let store = d2_store_new();

            // Invalid JSON
            let invalid = c("not valid json");
            assert!(take(d2_store_upsert(store, invalid.as_ptr()))["error"].is_string());
            assert!(take(d2_store_import(store, invalid.as_ptr()))["error"].is_string());

            // Unknown resource
            let unknown = c("organisationUnit");
            assert!(take(d2_store_get(store, unknown.as_ptr(), uid.as_ptr()))["error"].is_string());

            d2_store_free(store);
        }
    }
}
