use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::delivery::received_data::{DataChunk, ReclaimQueue};
use crate::delivery::state::{BodyMode, DeliveryMachine};
use crate::peer::request_peer::RequestPeer;
use crate::peer::snapshot::{TransferCounters, TransferSnapshot};
use crate::types::types::{
    CompletionInfo, DeliveryError, DeliveryState, RedirectInfo, RequestId, ResponseInfo,
};

/// Session entry point for callers that deliver from more than one context.
pub type SharedSession = Arc<Mutex<RequestSession>>;

/// Owns one request's lifecycle and drives its peer.
///
/// Every `deliver_*` call is validated against the [`DeliveryMachine`] before
/// the peer hears about it; a rejected call leaves the state untouched and
/// reaches no peer method. Once the session is cancelled, either through
/// [`cancel`](Self::cancel) or through its cancellation handle, later
/// deliveries are accepted and discarded.
pub struct RequestSession {
    id: RequestId,
    peer: Box<dyn RequestPeer>,
    machine: DeliveryMachine,
    started_at: Option<Instant>,
    counters: TransferCounters,
    response: Option<ResponseInfo>,
    completion: Option<CompletionInfo>,
    reclaim: ReclaimQueue,
    cancel_token: CancellationToken,
}

impl RequestSession {
    pub fn new(id: RequestId, peer: impl RequestPeer + 'static) -> Self {
        Self::with_cancel_token(id, peer, CancellationToken::new())
    }

    /// Ties the session's teardown to an existing token, e.g. a child of a
    /// fetcher-wide token.
    pub fn with_cancel_token(
        id: RequestId,
        peer: impl RequestPeer + 'static,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer: Box::new(peer),
            machine: DeliveryMachine::new(),
            started_at: None,
            counters: TransferCounters::default(),
            response: None,
            completion: None,
            reclaim: ReclaimQueue::new(),
            cancel_token,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> DeliveryState {
        self.machine.state()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.is_terminal()
    }

    pub fn counters(&self) -> TransferCounters {
        self.counters
    }

    pub fn response_info(&self) -> Option<&ResponseInfo> {
        self.response.as_ref()
    }

    pub fn completion(&self) -> Option<&CompletionInfo> {
        self.completion.as_ref()
    }

    /// Handle the owner uses to signal teardown. Cancelling it silences the
    /// peer from the next delivery on.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn start(&mut self) -> Result<(), DeliveryError> {
        if self.started_at.is_some() {
            return Err(DeliveryError::AlreadyStarted);
        }
        self.started_at = Some(Instant::now());
        log::debug!("[session] {}: started", self.id);
        Ok(())
    }

    /// Wraps received bytes in a chunk owned by this session's context.
    pub fn chunk(&self, payload: Bytes, encoded_len: u64) -> DataChunk {
        DataChunk::owned(payload, encoded_len, self.reclaim.handle())
    }

    /// Decides whether a delivery may reach the state machine. `Ok(false)`
    /// means the session is cancelled and the event is dropped.
    fn admit(&mut self, operation: &'static str) -> Result<bool, DeliveryError> {
        if self.started_at.is_none() {
            return Err(DeliveryError::ProtocolViolation {
                state: self.machine.state(),
                operation,
            });
        }
        if self.cancel_token.is_cancelled() && !self.machine.is_terminal() {
            self.machine.cancel()?;
            log::debug!("[session] {}: owner tore down, now cancelled", self.id);
        }
        if self.machine.state() == DeliveryState::Cancelled {
            log::debug!("[session] {}: discarding `{}` after cancel", self.id, operation);
            return Ok(false);
        }
        Ok(true)
    }

    pub fn deliver_upload_progress(&mut self, position: u64, size: u64) -> Result<(), DeliveryError> {
        if !self.admit("deliver_upload_progress")? {
            return Ok(());
        }
        self.machine.upload_progress(position, size)?;
        self.counters.upload_position = position;
        self.counters.upload_size = size;
        self.peer.on_upload_progress(position, size);
        Ok(())
    }

    /// Asks the peer whether to follow a redirect. A cancelled session never
    /// follows.
    pub fn deliver_redirect(
        &mut self,
        redirect: &RedirectInfo,
        info: &ResponseInfo,
    ) -> Result<bool, DeliveryError> {
        if !self.admit("deliver_redirect")? {
            return Ok(false);
        }
        self.machine.redirect()?;
        let follow = self.peer.on_received_redirect(redirect, info);
        if !follow {
            self.machine.redirect_vetoed();
        }
        Ok(follow)
    }

    pub fn deliver_headers(&mut self, info: ResponseInfo) -> Result<(), DeliveryError> {
        if !self.admit("deliver_headers")? {
            return Ok(());
        }
        self.machine.headers()?;
        let info = self.response.insert(info);
        self.peer.on_received_response(info);
        Ok(())
    }

    pub fn deliver_chunk(&mut self, chunk: DataChunk) -> Result<(), DeliveryError> {
        if !self.admit("deliver_chunk")? {
            return Ok(());
        }
        self.machine.body(BodyMode::InMemory)?;
        self.counters.bytes_received += chunk.len() as u64;
        self.counters.encoded_bytes_received += chunk.encoded_len();
        self.counters.chunks += 1;
        self.peer.on_received_data(chunk);
        self.reclaim.drain();
        Ok(())
    }

    pub fn deliver_downloaded_bytes(&mut self, len: u64, encoded_len: u64) -> Result<(), DeliveryError> {
        if !self.admit("deliver_downloaded_bytes")? {
            return Ok(());
        }
        self.machine.body(BodyMode::Downloaded)?;
        self.counters.bytes_downloaded += len;
        self.counters.encoded_bytes_received += encoded_len;
        self.peer.on_downloaded_data(len, encoded_len);
        Ok(())
    }

    pub fn deliver_cached_metadata(&mut self, data: &[u8]) -> Result<(), DeliveryError> {
        if !self.admit("deliver_cached_metadata")? {
            return Ok(());
        }
        self.machine.cached_metadata()?;
        self.counters.cached_metadata_len = data.len() as u64;
        self.peer.on_received_cached_metadata(data);
        Ok(())
    }

    pub fn complete(&mut self, completion: CompletionInfo) -> Result<(), DeliveryError> {
        if !self.admit("complete")? {
            return Ok(());
        }
        self.machine.complete()?;
        let completion = self.completion.insert(completion);
        self.peer.on_completed_request(completion);
        self.reclaim.drain();
        log::debug!(
            "[session] {}: completed with {} after {} body bytes",
            self.id,
            completion.error_code,
            self.counters.bytes_received + self.counters.bytes_downloaded
        );
        Ok(())
    }

    /// Headers, an optional body chunk and completion as one atomic step.
    pub fn deliver_completed_response(
        &mut self,
        info: ResponseInfo,
        data: Option<DataChunk>,
        completion: CompletionInfo,
    ) -> Result<(), DeliveryError> {
        if !self.admit("deliver_completed_response")? {
            return Ok(());
        }
        self.machine.completed_response(data.is_some())?;
        if let Some(chunk) = &data {
            self.counters.bytes_received += chunk.len() as u64;
            self.counters.encoded_bytes_received += chunk.encoded_len();
            self.counters.chunks += 1;
        }
        let info = self.response.insert(info);
        let completion = self.completion.insert(completion);
        self.peer.on_received_completed_response(info, data, completion);
        self.reclaim.drain();
        Ok(())
    }

    /// Moves to `Cancelled` and trips the cancellation handle. Cancelling a
    /// cancelled session is a no-op; cancelling a completed one fails.
    pub fn cancel(&mut self) -> Result<(), DeliveryError> {
        if self.machine.state() == DeliveryState::Cancelled {
            return Ok(());
        }
        self.machine.cancel()?;
        self.cancel_token.cancel();
        log::debug!("[session] {}: cancelled", self.id);
        Ok(())
    }

    /// Releases payloads of chunks that were dropped on other threads, in the
    /// order they were dropped.
    pub fn reclaim(&mut self) -> usize {
        self.reclaim.drain()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let elapsed_secs = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let body_bytes = self.counters.bytes_received + self.counters.bytes_downloaded;
        let speed = if elapsed_secs > 0.0 {
            body_bytes as f64 / elapsed_secs
        } else {
            0.0
        };

        TransferSnapshot {
            request_id: self.id,
            state: self.machine.state(),
            body_mode: self.machine.body_mode(),
            counters: self.counters,
            expected_bytes: self.response.as_ref().and_then(|r| r.content_length),
            elapsed_secs,
            speed,
        }
    }
}

impl Drop for RequestSession {
    fn drop(&mut self) {
        self.reclaim.drain();
    }
}
