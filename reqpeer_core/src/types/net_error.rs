//! Numeric error codes carried by `CompletionInfo::error_code`.
//!
//! Values follow the Chromium net error table so peers written against that
//! numbering keep working. Zero is success; every failure is negative.

pub const OK: i32 = 0;
pub const ERR_FAILED: i32 = -2;
pub const ERR_ABORTED: i32 = -3;
pub const ERR_INVALID_ARGUMENT: i32 = -4;
pub const ERR_TIMED_OUT: i32 = -7;
pub const ERR_ACCESS_DENIED: i32 = -10;
pub const ERR_FILE_NO_SPACE: i32 = -18;
pub const ERR_CONNECTION_RESET: i32 = -101;
pub const ERR_CONNECTION_REFUSED: i32 = -102;
pub const ERR_NAME_NOT_RESOLVED: i32 = -105;
pub const ERR_INVALID_URL: i32 = -300;
pub const ERR_TOO_MANY_REDIRECTS: i32 = -310;
pub const ERR_UNSAFE_REDIRECT: i32 = -311;
pub const ERR_INVALID_RESPONSE: i32 = -320;
pub const ERR_CONTENT_DECODING_FAILED: i32 = -330;

/// Symbolic name of a code, or `"ERR_UNKNOWN"`.
pub fn name(code: i32) -> &'static str {
    match code {
        OK => "OK",
        ERR_FAILED => "ERR_FAILED",
        ERR_ABORTED => "ERR_ABORTED",
        ERR_INVALID_ARGUMENT => "ERR_INVALID_ARGUMENT",
        ERR_TIMED_OUT => "ERR_TIMED_OUT",
        ERR_ACCESS_DENIED => "ERR_ACCESS_DENIED",
        ERR_FILE_NO_SPACE => "ERR_FILE_NO_SPACE",
        ERR_CONNECTION_RESET => "ERR_CONNECTION_RESET",
        ERR_CONNECTION_REFUSED => "ERR_CONNECTION_REFUSED",
        ERR_NAME_NOT_RESOLVED => "ERR_NAME_NOT_RESOLVED",
        ERR_INVALID_URL => "ERR_INVALID_URL",
        ERR_TOO_MANY_REDIRECTS => "ERR_TOO_MANY_REDIRECTS",
        ERR_UNSAFE_REDIRECT => "ERR_UNSAFE_REDIRECT",
        ERR_INVALID_RESPONSE => "ERR_INVALID_RESPONSE",
        ERR_CONTENT_DECODING_FAILED => "ERR_CONTENT_DECODING_FAILED",
        _ => "ERR_UNKNOWN",
    }
}

/// Maps a transport failure onto the closest net error code.
pub fn from_reqwest(err: &reqwest::Error) -> i32 {
    if err.is_timeout() {
        ERR_TIMED_OUT
    } else if err.is_connect() {
        ERR_CONNECTION_REFUSED
    } else if err.is_redirect() {
        ERR_TOO_MANY_REDIRECTS
    } else if err.is_builder() {
        ERR_INVALID_URL
    } else if err.is_decode() {
        ERR_CONTENT_DECODING_FAILED
    } else if err.is_body() {
        ERR_CONNECTION_RESET
    } else {
        ERR_FAILED
    }
}

/// Maps a file-sink failure onto a net error code.
pub fn from_io(err: &std::io::Error) -> i32 {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => ERR_ACCESS_DENIED,
        std::io::ErrorKind::StorageFull => ERR_FILE_NO_SPACE,
        _ => ERR_FAILED,
    }
}
