//! FFI (Foreign Function Interface) for C/Go interoperability

use crate::error::ErrorCode;
use crate::pipeline::{render, Progress};
use crate::{
    available, available_audio, AudioCodec, Codec, Container, EncodeOptions, ProjectConfig,
};
use libc::{c_char, c_void};
use std::ffi::{CStr, CString};
use std::ptr;

/// FFI result structure
#[repr(C)]
pub struct FfiResult {
    pub code: ErrorCode,
    pub message: *mut c_char,
}

impl FfiResult {
    fn ok() -> Self {
        Self {
            code: ErrorCode::Ok,
            message: ptr::null_mut(),
        }
    }

    fn error(code: ErrorCode, message: &str) -> Self {
        let message = CString::new(message.replace('\0', " "))
            .map(CString::into_raw)
            .unwrap_or(ptr::null_mut());
        Self { code, message }
    }

    fn from_result<T>(result: crate::Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::error(ErrorCode::from(&e), &e.to_string()),
        }
    }
}

/// Progress callback: percent (0-100), a NUL-terminated message valid only
/// for the duration of the call, and the caller's user data
pub type FfiProgressCallback =
    Option<unsafe extern "C" fn(percent: f32, message: *const c_char, user_data: *mut c_void)>;

/// Read an optional C string; `Err` carries the failure to return
unsafe fn optional_str<'a>(
    value: *const c_char,
    what: &str,
) -> std::result::Result<Option<&'a str>, FfiResult> {
    if value.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(value)
        .to_str()
        .map(Some)
        .map_err(|_| FfiResult::error(ErrorCode::InvalidInput, &format!("Invalid {}", what)))
}

unsafe fn required_str<'a>(
    value: *const c_char,
    what: &str,
) -> std::result::Result<&'a str, FfiResult> {
    match optional_str(value, what)? {
        Some(s) => Ok(s),
        None => Err(FfiResult::error(
            ErrorCode::InvalidInput,
            &format!("{} is null", what),
        )),
    }
}

/// Check if a video codec is available
///
/// # Safety
/// - `ffmpeg_path` must be a valid null-terminated string or null
#[no_mangle]
pub unsafe extern "C" fn slidecast_available(
    codec: Codec,
    ffmpeg_path: *const c_char,
) -> FfiResult {
    match optional_str(ffmpeg_path, "ffmpeg path") {
        Ok(ffmpeg_path) => FfiResult::from_result(available(codec, ffmpeg_path)),
        Err(result) => result,
    }
}

/// Check if an audio codec is available
///
/// # Safety
/// - `ffmpeg_path` must be a valid null-terminated string or null
#[no_mangle]
pub unsafe extern "C" fn slidecast_available_audio(
    codec: AudioCodec,
    ffmpeg_path: *const c_char,
) -> FfiResult {
    match optional_str(ffmpeg_path, "ffmpeg path") {
        Ok(ffmpeg_path) => FfiResult::from_result(available_audio(codec, ffmpeg_path)),
        Err(result) => result,
    }
}

/// Render a project document to a video file
///
/// # Safety
/// - `project_json` and `output_path` must be valid null-terminated strings
/// - `ffmpeg_path` must be a valid null-terminated string or null
/// - `callback`, when not null, is invoked on the calling thread with `user_data`
#[no_mangle]
pub unsafe extern "C" fn slidecast_render(
    project_json: *const c_char,
    output_path: *const c_char,
    container: Container,
    codec: Codec,
    audio_codec: AudioCodec,
    quality: u8,
    ffmpeg_path: *const c_char,
    callback: FfiProgressCallback,
    user_data: *mut c_void,
) -> FfiResult {
    let project_json = match required_str(project_json, "project JSON") {
        Ok(s) => s,
        Err(result) => return result,
    };
    let output_path = match required_str(output_path, "output path") {
        Ok(s) => s.to_string(),
        Err(result) => return result,
    };
    let ffmpeg_path = match optional_str(ffmpeg_path, "ffmpeg path") {
        Ok(s) => s.map(str::to_string),
        Err(result) => return result,
    };

    let config = match ProjectConfig::from_json_str(project_json) {
        Ok(config) => config,
        Err(e) => return FfiResult::error(ErrorCode::from(&e), &e.to_string()),
    };

    let options = EncodeOptions {
        output_path,
        container,
        codec,
        audio_codec,
        quality,
        ffmpeg_path,
        ..EncodeOptions::default()
    };

    let report = |update: Progress| {
        if let Some(callback) = callback {
            if let Ok(message) = CString::new(update.message.replace('\0', " ")) {
                callback(update.percent, message.as_ptr(), user_data);
            }
        }
    };

    FfiResult::from_result(render(&config, &options, report))
}

/// Free a result's message string
///
/// # Safety
/// - `result` must point to a valid `FfiResult` that was returned by a slidecast function
#[no_mangle]
pub unsafe extern "C" fn slidecast_free_result(result: *mut FfiResult) {
    if result.is_null() {
        return;
    }

    let result = &mut *result;
    if !result.message.is_null() {
        // Reclaim the CString and let it drop
        let _ = CString::from_raw(result.message);
        result.message = ptr::null_mut();
    }
}

/// Get version string
#[no_mangle]
pub extern "C" fn slidecast_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
