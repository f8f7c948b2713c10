use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::types::types::{CompletionInfo, RedirectInfo, RequestId, ResponseInfo};

/// Raw notification produced by a transport for one request.
#[derive(Debug)]
pub enum TransportEvent {
    UploadProgress {
        position: u64,
        size: u64,
    },
    /// The transport waits on `reply` for the follow/suppress decision.
    Redirect {
        redirect: RedirectInfo,
        info: ResponseInfo,
        reply: oneshot::Sender<bool>,
    },
    Response(ResponseInfo),
    Data {
        payload: Bytes,
        encoded_len: u64,
    },
    DownloadedData {
        len: u64,
        encoded_len: u64,
    },
    CachedMetadata(Bytes),
    Completed(CompletionInfo),
    CompletedResponse {
        info: ResponseInfo,
        payload: Option<Bytes>,
        completion: CompletionInfo,
    },
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportEvent::Completed(_) | TransportEvent::CompletedResponse { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::UploadProgress { .. } => "upload_progress",
            TransportEvent::Redirect { .. } => "redirect",
            TransportEvent::Response(_) => "response",
            TransportEvent::Data { .. } => "data",
            TransportEvent::DownloadedData { .. } => "downloaded_data",
            TransportEvent::CachedMetadata(_) => "cached_metadata",
            TransportEvent::Completed(_) => "completed",
            TransportEvent::CompletedResponse { .. } => "completed_response",
        }
    }
}

/// A transport event addressed to a request.
#[derive(Debug)]
pub struct Envelope {
    pub id: RequestId,
    pub event: TransportEvent,
}

pub type EventSender = mpsc::Sender<Envelope>;
pub type EventReceiver = mpsc::Receiver<Envelope>;
