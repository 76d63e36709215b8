//! FFI bindings for Synheart Ergo
//!
//! This module provides C-compatible functions for embedding the per-frame
//! analyzer in a host application that owns the camera and landmark model.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `ergo_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::ErgoConfig;
use crate::error::ErgoError;
use crate::pipeline::FrameAnalyzer;
use crate::schema::FrameRecordAdapter;
use crate::types::MonitorSelection;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Opaque handle to a FrameAnalyzer
pub struct ErgoAnalyzerHandle {
    analyzer: FrameAnalyzer,
    monitors: MonitorSelection,
}

fn build_analyzer(config_toml: Option<String>, measured_fps: f64) -> Result<FrameAnalyzer, ErgoError> {
    let config = match config_toml {
        Some(toml) => ErgoConfig::from_toml_str(&toml)?,
        None => ErgoConfig::default(),
    };
    let fps = (measured_fps > 0.0).then_some(measured_fps);
    FrameAnalyzer::new(&config, fps)
}

/// Create a new analyzer.
///
/// # Safety
/// - `config_toml` must be a valid null-terminated C string, or NULL for defaults.
/// - `measured_fps` is the camera frame rate; pass 0 if unknown.
/// - Returns a pointer that must be freed with `ergo_analyzer_free`.
/// - Returns NULL on error; call `ergo_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ergo_analyzer_new(
    config_toml: *const c_char,
    measured_fps: f64,
) -> *mut ErgoAnalyzerHandle {
    clear_last_error();

    let config = if config_toml.is_null() {
        None
    } else {
        match cstr_to_string(config_toml) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid config string (not UTF-8)");
                return ptr::null_mut();
            }
        }
    };

    match build_analyzer(config, measured_fps) {
        Ok(analyzer) => Box::into_raw(Box::new(ErgoAnalyzerHandle {
            analyzer,
            monitors: MonitorSelection::default(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an analyzer.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ergo_analyzer_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ergo_analyzer_free(handle: *mut ErgoAnalyzerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Select which monitors run on subsequent frames.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ergo_analyzer_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn ergo_analyzer_set_monitors(
    handle: *mut ErgoAnalyzerHandle,
    posture: i32,
    eye_strain: i32,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_mut() else {
        set_last_error("Null analyzer pointer");
        return -1;
    };
    handle.monitors = MonitorSelection {
        posture: posture != 0,
        eye_strain: eye_strain != 0,
    };
    0
}

/// Analyse one ergo.landmark_frame.v1 record and return its stream messages.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `ergo_analyzer_new`.
/// - `frame_json` must be a valid null-terminated C string.
/// - Returns a JSON array string that must be freed with `ergo_free_string`.
/// - Returns NULL on error; call `ergo_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ergo_analyzer_process(
    handle: *mut ErgoAnalyzerHandle,
    frame_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle.as_mut() else {
        set_last_error("Null analyzer pointer");
        return ptr::null_mut();
    };

    let json = match cstr_to_string(frame_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid frame JSON string pointer");
            return ptr::null_mut();
        }
    };

    let result = serde_json::from_str(&json)
        .map_err(ErgoError::from)
        .and_then(|record| FrameRecordAdapter::to_landmark_frame(&record))
        .and_then(|frame| {
            let messages = handle.analyzer.process(&frame, handle.monitors);
            serde_json::to_string(&messages).map_err(ErgoError::from)
        });

    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a string returned by Ergo functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an Ergo function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ergo_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Ergo function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ergo_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Ergo library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ergo_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
