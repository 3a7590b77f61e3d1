//! FFI layer for mobile hosts.
//!
//! This module provides C-compatible functions that can be called from the
//! host application's native bridge. All data crosses the boundary as JSON
//! strings.
//!
//! # Memory Management
//!
//! - Strings returned by `synclist_*` functions are allocated by Rust
//! - Caller must free them with `synclist_string_free`
//! - Reconciler pointers must be freed with `synclist_reconciler_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{Change, MatchPolicy, Reconciler, Record, RowSchema};
use serde::de::DeserializeOwned;
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
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

/// Convert a Rust string to a C string pointer.
/// Caller must free with `synclist_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CString::new(r#"{"error":"string contained null bytes"}"#)
            .unwrap_or_default()
            .into_raw(),
    }
}

fn error_string(message: impl Into<String>) -> *mut c_char {
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

/// Parse a JSON argument, naming it in the error message.
unsafe fn parse_arg<T: DeserializeOwned>(ptr: *const c_char, what: &str) -> Result<T, String> {
    let raw = from_c_string(ptr).ok_or_else(|| format!("invalid {} JSON", what))?;
    serde_json::from_str(&raw).map_err(|e| format!("parse error: {}", e))
}

// ============================================================================
// Reconciler Lifecycle
// ============================================================================

/// Create a new reconciler.
///
/// # Arguments
/// - `policy_json`: JSON string of MatchPolicy, or null for the default policy
///
/// # Returns
/// Pointer to Reconciler, or null on failure.
///
/// # Safety
/// - `policy_json` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `synclist_reconciler_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_reconciler_new(policy_json: *const c_char) -> *mut Reconciler {
    let policy = if policy_json.is_null() {
        MatchPolicy::default()
    } else {
        match parse_arg::<MatchPolicy>(policy_json, "policy") {
            Ok(p) => p,
            Err(_) => return ptr::null_mut(),
        }
    };

    if policy.validate().is_err() {
        return ptr::null_mut();
    }

    Box::into_raw(Box::new(Reconciler::new(policy)))
}

/// Free a reconciler.
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn synclist_reconciler_free(reconciler: *mut Reconciler) {
    if !reconciler.is_null() {
        drop(Box::from_raw(reconciler));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `synclist_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn synclist_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Server Side
// ============================================================================

/// Replace the authoritative list with a fetch result.
///
/// # Arguments
/// - `records_json`: JSON array of Records
///
/// # Returns
/// JSON string: `{"ok": FetchOutcome}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `records_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_apply_initial_fetch(
    reconciler: *mut Reconciler,
    records_json: *const c_char,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let records: Vec<Record> = match parse_arg(records_json, "records") {
        Ok(r) => r,
        Err(e) => return error_string(e),
    };

    let outcome = reconciler.apply_initial_fetch(records);
    to_c_string(FfiResult::ok(outcome).to_json())
}

/// Fold a change notification into the reconciler.
///
/// # Arguments
/// - `change_json`: JSON string of Change (`{"event": "insert", "record": {..}}`)
///
/// # Returns
/// JSON string: `{"ok": ChangeOutcome}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `change_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_apply_change(
    reconciler: *mut Reconciler,
    change_json: *const c_char,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let change: Change = match parse_arg(change_json, "change") {
        Ok(c) => c,
        Err(e) => return error_string(e),
    };

    let outcome = reconciler.apply_change(change);
    to_c_string(FfiResult::ok(outcome).to_json())
}

/// Decode a raw platform notification and fold it into the reconciler.
///
/// # Arguments
/// - `message_json`: raw notification (`{"event": "INSERT", "record": {<row>}}`)
/// - `schema_json`: JSON string of RowSchema, or null for the default columns
///
/// # Returns
/// JSON string: `{"ok": ChangeOutcome}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `message_json` and `schema_json` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_apply_notification(
    reconciler: *mut Reconciler,
    message_json: *const c_char,
    schema_json: *const c_char,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let schema = if schema_json.is_null() {
        RowSchema::default()
    } else {
        match parse_arg::<RowSchema>(schema_json, "schema") {
            Ok(s) => s,
            Err(e) => return error_string(e),
        }
    };

    let message: serde_json::Value = match parse_arg(message_json, "message") {
        Ok(m) => m,
        Err(e) => return error_string(e),
    };

    match schema.decode_notification(&message) {
        Ok(change) => to_c_string(FfiResult::ok(reconciler.apply_change(change)).to_json()),
        Err(e) => error_string(e.to_string()),
    }
}

// ============================================================================
// Client Side
// ============================================================================

/// Add an optimistic record.
///
/// # Arguments
/// - `record_json`: JSON string of Record; a non-temporary id is replaced
///
/// # Returns
/// JSON string: `{"ok": "<temporary id>"}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `record_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_add_optimistic(
    reconciler: *mut Reconciler,
    record_json: *const c_char,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let record: Record = match parse_arg(record_json, "record") {
        Ok(r) => r,
        Err(e) => return error_string(e),
    };

    let temp_id = reconciler.add_optimistic(record);
    to_c_string(FfiResult::ok(temp_id).to_json())
}

/// Stage an optimistic record for a payload.
///
/// # Arguments
/// - `payload_json`: JSON payload
/// - `created_at`: Timestamp in milliseconds
///
/// # Returns
/// JSON string: `{"ok": "<temporary id>"}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `payload_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_stage(
    reconciler: *mut Reconciler,
    payload_json: *const c_char,
    created_at: u64,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let payload: serde_json::Value = match parse_arg(payload_json, "payload") {
        Ok(p) => p,
        Err(e) => return error_string(e),
    };

    let temp_id = reconciler.stage(payload, created_at);
    to_c_string(FfiResult::ok(temp_id).to_json())
}

/// Retract an optimistic record.
///
/// # Returns
/// JSON string: `{"ok": Record}` or `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `temp_id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_remove_optimistic(
    reconciler: *mut Reconciler,
    temp_id: *const c_char,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let temp_id = match from_c_string(temp_id) {
        Some(id) => id,
        None => return error_string("invalid temp id"),
    };

    let removed = reconciler.remove_optimistic(&temp_id);
    to_c_string(FfiResult::ok(removed).to_json())
}

/// Retract optimistic records older than `max_age` milliseconds.
///
/// # Returns
/// JSON string: `{"ok": ["<temporary id>", ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_prune_stale(
    reconciler: *mut Reconciler,
    now: u64,
    max_age: u64,
) -> *mut c_char {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    let pruned = reconciler.prune_stale(now, max_age);
    to_c_string(FfiResult::ok(pruned).to_json())
}

// ============================================================================
// View
// ============================================================================

/// Get the reconciled view.
///
/// # Returns
/// JSON string: `{"ok": [Record, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - Caller must free the returned string with `synclist_string_free`
#[no_mangle]
pub unsafe extern "C" fn synclist_view(reconciler: *const Reconciler) -> *mut c_char {
    let reconciler = match reconciler.as_ref() {
        Some(r) => r,
        None => return error_string("null reconciler pointer"),
    };

    to_c_string(FfiResult::ok(reconciler.view()).to_json())
}

/// Get the number of optimistic records awaiting confirmation.
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
#[no_mangle]
pub unsafe extern "C" fn synclist_pending_count(reconciler: *const Reconciler) -> i64 {
    match reconciler.as_ref() {
        Some(r) => r.pending_count() as i64,
        None => -1,
    }
}

/// Tag temporary ids minted from now on with `node`.
///
/// Hosts should pass a value unique to the device or session, so that two
/// clients never mint the same temporary id.
///
/// # Returns
/// 0 on success, -1 on a null pointer or invalid string.
///
/// # Safety
/// - `reconciler` must be a valid pointer from `synclist_reconciler_new` or null
/// - `node` must be a valid null-terminated C string or null
#[no_mangle]
pub unsafe extern "C" fn synclist_set_node(
    reconciler: *mut Reconciler,
    node: *const c_char,
) -> i32 {
    let reconciler = match reconciler.as_mut() {
        Some(r) => r,
        None => return -1,
    };

    match from_c_string(node) {
        Some(node) => {
            reconciler.set_node(node);
            0
        }
        None => -1,
    }
}

/// Get the engine version string.
///
/// The returned pointer is static and must not be freed.
#[no_mangle]
pub extern "C" fn synclist_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take(result: *mut c_char) -> serde_json::Value {
        let json = CStr::from_ptr(result).to_str().unwrap().to_string();
        synclist_string_free(result);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn ffi_reconciler_lifecycle() {
        unsafe {
            let reconciler = synclist_reconciler_new(ptr::null());
            assert!(!reconciler.is_null());
            synclist_reconciler_free(reconciler);

            let policy = CString::new(r#"{"toleranceMs": 500}"#).unwrap();
            let reconciler = synclist_reconciler_new(policy.as_ptr());
            assert!(!reconciler.is_null());
            synclist_reconciler_free(reconciler);

            let invalid = CString::new(r#"{"correlate": false, "heuristic": false}"#).unwrap();
            assert!(synclist_reconciler_new(invalid.as_ptr()).is_null());
        }
    }

    #[test]
    fn ffi_optimistic_then_confirmed() {
        unsafe {
            let reconciler = synclist_reconciler_new(ptr::null());

            let record = CString::new(
                r#"{
                    "id": "temp-1",
                    "createdAt": 1706745600000,
                    "payload": {"text": "hi"}
                }"#,
            )
            .unwrap();
            let result = take(synclist_add_optimistic(reconciler, record.as_ptr()));
            assert_eq!(result["ok"], "temp-1");
            assert_eq!(synclist_pending_count(reconciler), 1);

            let change = CString::new(
                r#"{
                    "event": "insert",
                    "record": {
                        "id": "srv-9",
                        "createdAt": 1706745600500,
                        "payload": {"text": "hi"}
                    }
                }"#,
            )
            .unwrap();
            let result = take(synclist_apply_change(reconciler, change.as_ptr()));
            assert_eq!(result["ok"]["retired"], "temp-1");

            let view = take(synclist_view(reconciler));
            assert_eq!(view["ok"].as_array().unwrap().len(), 1);
            assert_eq!(view["ok"][0]["id"], "srv-9");
            assert_eq!(synclist_pending_count(reconciler), 0);

            synclist_reconciler_free(reconciler);
        }
    }

    #[test]
    fn ffi_raw_notification_and_fetch() {
        unsafe {
            let reconciler = synclist_reconciler_new(ptr::null());

            let records = CString::new(
                r#"[{"id": "a", "createdAt": 1, "payload": {"content": "one"}, "origin": "confirmed"}]"#,
            )
            .unwrap();
            let result = take(synclist_apply_initial_fetch(reconciler, records.as_ptr()));
            assert_eq!(result["ok"]["confirmed"], 1);
            assert_eq!(result["ok"]["retired"], serde_json::json!([]));

            let message = CString::new(
                r#"{"event": "UPDATE", "record": {"id": "a", "is_read": true}}"#,
            )
            .unwrap();
            let result = take(synclist_apply_notification(
                reconciler,
                message.as_ptr(),
                ptr::null(),
            ));
            assert_eq!(result["ok"]["applied"], true);

            let view = take(synclist_view(reconciler));
            assert_eq!(view["ok"][0]["payload"]["is_read"], true);
            assert_eq!(view["ok"][0]["payload"]["content"], "one");

            synclist_reconciler_free(reconciler);
        }
    }

    #[test]
    fn ffi_stage_remove_and_prune() {
        unsafe {
            let reconciler = synclist_reconciler_new(ptr::null());

            let payload = CString::new(r#"{"lat": 1.0, "lng": 2.0}"#).unwrap();
            let staged = take(synclist_stage(reconciler, payload.as_ptr(), 1000));
            let temp_id = staged["ok"].as_str().unwrap().to_string();

            let id = CString::new(temp_id.clone()).unwrap();
            let removed = take(synclist_remove_optimistic(reconciler, id.as_ptr()));
            assert_eq!(removed["ok"]["id"], temp_id.as_str());

            let removed = take(synclist_remove_optimistic(reconciler, id.as_ptr()));
            assert!(removed["ok"].is_null());

            take(synclist_stage(reconciler, payload.as_ptr(), 1000));
            let pruned = take(synclist_prune_stale(reconciler, 10_000, 5_000));
            assert_eq!(pruned["ok"].as_array().unwrap().len(), 1);
            assert_eq!(synclist_pending_count(reconciler), 0);

            synclist_reconciler_free(reconciler);
        }
    }

    #[test]
    fn ffi_node_tag() {
        unsafe {
            let reconciler = synclist_reconciler_new(ptr::null());
            let node = CString::new("dev42").unwrap();
            assert_eq!(synclist_set_node(reconciler, node.as_ptr()), 0);
            assert_eq!(synclist_set_node(ptr::null_mut(), node.as_ptr()), -1);

            let payload = CString::new(r#"{"text": "hi"}"#).unwrap();
            let staged = take(synclist_stage(reconciler, payload.as_ptr(), 1000));
            assert_eq!(staged["ok"], "temp-1000-1-dev42");

            synclist_reconciler_free(reconciler);
        }
    }

    #[test]
    fn ffi_version() {
        unsafe {
            let version = synclist_version();
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }

    #[test]
    fn ffi_error_handling() {
        unsafe {
            // Null reconciler pointer
            let result = take(synclist_view(ptr::null()));
            assert!(result["error"].is_string());
            assert_eq!(synclist_pending_count(ptr::null()), -1);

            // Invalid JSON
            let reconciler = synclist_reconciler_new(ptr::null());
            let invalid = CString::new("not valid json").unwrap();
            let result = take(synclist_apply_change(reconciler, invalid.as_ptr()));
            assert!(result["error"].as_str().unwrap().starts_with("parse error"));

            // Unknown event
            let message = CString::new(r#"{"event": "truncate"}"#).unwrap();
            let result = take(synclist_apply_notification(
                reconciler,
                message.as_ptr(),
                ptr::null(),
            ));
            assert_eq!(result["error"], "unknown change event: truncate");

            synclist_reconciler_free(reconciler);
        }
    }
}
