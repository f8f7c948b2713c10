#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use reqpeer_core::{
    CompletionInfo, DataChunk, LoadTiming, RedirectInfo, RequestPeer, ResponseInfo,
};

/// One observed peer notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UploadProgress(u64, u64),
    Redirect(String),
    Response(u16),
    DownloadedData(u64, u64),
    Data(Vec<u8>, u64),
    CachedMetadata(Vec<u8>),
    Completed(i32),
    CompletedResponse {
        status: u16,
        data: Option<Vec<u8>>,
        error_code: i32,
    },
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Peer that records every call it receives.
pub struct RecordingPeer {
    log: CallLog,
    follow_redirects: bool,
    /// Chunks handed off here are dropped on another thread by the test.
    keep_chunks: Option<Arc<Mutex<Vec<DataChunk>>>>,
}

impl RecordingPeer {
    pub fn new() -> (Self, CallLog) {
        let log = CallLog::default();
        (
            Self {
                log: log.clone(),
                follow_redirects: true,
                keep_chunks: None,
            },
            log,
        )
    }

    pub fn vetoing_redirects() -> (Self, CallLog) {
        let (mut peer, log) = Self::new();
        peer.follow_redirects = false;
        (peer, log)
    }

    pub fn keeping_chunks(store: Arc<Mutex<Vec<DataChunk>>>) -> (Self, CallLog) {
        let (mut peer, log) = Self::new();
        peer.keep_chunks = Some(store);
        (peer, log)
    }

    fn push(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

impl RequestPeer for RecordingPeer {
    fn on_upload_progress(&mut self, position: u64, size: u64) {
        self.push(Call::UploadProgress(position, size));
    }

    fn on_received_redirect(&mut self, redirect: &RedirectInfo, _info: &ResponseInfo) -> bool {
        self.push(Call::Redirect(redirect.new_url.clone()));
        self.follow_redirects
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        self.push(Call::Response(info.status));
    }

    fn on_downloaded_data(&mut self, len: u64, encoded_len: u64) {
        self.push(Call::DownloadedData(len, encoded_len));
    }

    fn on_received_data(&mut self, data: DataChunk) {
        self.push(Call::Data(data.payload().to_vec(), data.encoded_len()));
        if let Some(store) = &self.keep_chunks {
            store.lock().unwrap().push(data);
        }
    }

    fn on_received_cached_metadata(&mut self, data: &[u8]) {
        self.push(Call::CachedMetadata(data.to_vec()));
    }

    fn on_completed_request(&mut self, completion: &CompletionInfo) {
        self.push(Call::Completed(completion.error_code));
    }

    fn on_received_completed_response(
        &mut self,
        info: &ResponseInfo,
        data: Option<DataChunk>,
        completion: &CompletionInfo,
    ) {
        self.push(Call::CompletedResponse {
            status: info.status,
            data: data.map(|d| d.payload().to_vec()),
            error_code: completion.error_code,
        });
    }
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn response_info(status: u16) -> ResponseInfo {
    let now = SystemTime::now();
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), vec!["text/plain".to_string()]);
    ResponseInfo::new(
        "http://example.test/resource",
        status,
        headers,
        LoadTiming {
            request_start: now,
            response_start: now,
        },
    )
}

pub fn redirect_to(url: &str) -> RedirectInfo {
    RedirectInfo {
        new_url: url.to_string(),
        new_method: "GET".to_string(),
        status_code: 302,
    }
}
