use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::net_error;

/// Identifies one request for the lifetime of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    HeadersReceived,
    Streaming,
    Completed,
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Completed | DeliveryState::Cancelled)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryState::Pending => "pending",
            DeliveryState::HeadersReceived => "headers-received",
            DeliveryState::Streaming => "streaming",
            DeliveryState::Completed => "completed",
            DeliveryState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Request and response timestamps recorded by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadTiming {
    pub request_start: SystemTime,
    pub response_start: SystemTime,
}

/// Immutable snapshot of response metadata, delivered once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    /// Header names are lower-cased; repeated headers keep every value in arrival order.
    pub headers: HashMap<String, Vec<String>>,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
    pub content_length: Option<u64>,
    pub remote_addr: Option<SocketAddr>,
    pub timing: LoadTiming,
}

impl ResponseInfo {
    /// Builds a response snapshot, deriving MIME type and charset from `Content-Type`.
    pub fn new(
        url: impl Into<String>,
        status: u16,
        headers: HashMap<String, Vec<String>>,
        timing: LoadTiming,
    ) -> Self {
        let headers: HashMap<String, Vec<String>> = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        let (mime_type, charset) = headers
            .get("content-type")
            .and_then(|v| v.first())
            .map(|ct| parse_content_type(ct))
            .unwrap_or((None, None));

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.first())
            .and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            url: url.into(),
            status,
            status_text: String::new(),
            http_version: "HTTP/1.1".to_string(),
            headers,
            mime_type,
            charset,
            content_length,
            remote_addr: None,
            timing,
        }
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn with_http_version(mut self, version: impl Into<String>) -> Self {
        self.http_version = version.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

/// Splits `text/html; charset=UTF-8` into `("text/html", "utf-8")`.
pub(crate) fn parse_content_type(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());

    let charset = parts.find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            let val = val.trim().trim_matches('"');
            (!val.is_empty()).then(|| val.to_ascii_lowercase())
        } else {
            None
        }
    });

    (mime, charset)
}

/// Describes the request that will be issued if a redirect is followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectInfo {
    pub new_url: String,
    pub new_method: String,
    pub status_code: u16,
}

/// Terminal outcome of a request, reported exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionInfo {
    /// `net_error::OK` on success, a negative net error code otherwise.
    pub error_code: i32,
    pub was_ignored_by_handler: bool,
    pub stale_copy_in_cache: bool,
    /// Opaque to the core; handed through to the peer untouched.
    pub security_info: Vec<u8>,
    pub completion_time: SystemTime,
    pub total_transfer_size: u64,
}

impl CompletionInfo {
    pub fn success(total_transfer_size: u64) -> Self {
        Self::with_error(net_error::OK, total_transfer_size)
    }

    pub fn with_error(error_code: i32, total_transfer_size: u64) -> Self {
        Self {
            error_code,
            was_ignored_by_handler: false,
            stale_copy_in_cache: false,
            security_info: Vec::new(),
            completion_time: SystemTime::now(),
            total_transfer_size,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == net_error::OK
    }

    /// The failure as a `DeliveryError::Network`, or `None` when the request succeeded.
    pub fn network_error(&self) -> Option<DeliveryError> {
        (!self.is_success()).then_some(DeliveryError::Network(self.error_code))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub username: String,
    pub password: String,
}

/// Everything a loader needs to issue one request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, Vec<String>>,
    pub cookies: Option<String>,
    pub authentication: Option<AuthenticationInfo>,
    pub body: Option<Bytes>,
    pub report_upload_progress: bool,
    /// When set, the body is written here and the peer only hears byte counts.
    pub download_to_file: Option<PathBuf>,
}

impl RequestInfo {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            cookies: None,
            authentication: None,
            body: None,
            report_upload_progress: false,
            download_to_file: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_ascii_uppercase();
        self
    }

    pub fn add_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    pub fn with_authentication(mut self, auth: AuthenticationInfo) -> Self {
        self.authentication = Some(auth);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>, report_upload_progress: bool) -> Self {
        self.body = Some(body.into());
        self.report_upload_progress = report_upload_progress;
        self
    }

    pub fn with_download_to_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_to_file = Some(path.into());
        self
    }
}

/// Contract violations and terminal failures reported by sessions and drivers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("protocol violation: `{operation}` is not allowed while {state}")]
    ProtocolViolation {
        state: DeliveryState,
        operation: &'static str,
    },

    #[error("network error {0}")]
    Network(i32),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session already completed")]
    AlreadyCompleted,

    #[error("a live session already exists for {0}")]
    DuplicateRequest(RequestId),

    #[error("request was cancelled")]
    Cancelled,
}

/// Failures of the transport collaborator while producing events.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("event channel closed")]
    ChannelClosed,

    #[error("load cancelled")]
    Cancelled,
}
