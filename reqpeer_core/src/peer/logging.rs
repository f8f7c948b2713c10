use crate::delivery::received_data::DataChunk;
use crate::types::net_error;
use crate::types::types::{CompletionInfo, RedirectInfo, RequestId, ResponseInfo};

use super::request_peer::RequestPeer;

/// Logs every notification through the `log` facade, then forwards it.
pub struct LoggingPeer<P> {
    id: RequestId,
    inner: P,
}

impl<P: RequestPeer> LoggingPeer<P> {
    pub fn new(id: RequestId, inner: P) -> Self {
        Self { id, inner }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: RequestPeer> RequestPeer for LoggingPeer<P> {
    fn on_upload_progress(&mut self, position: u64, size: u64) {
        log::trace!("[peer] {}: upload {}/{}", self.id, position, size);
        self.inner.on_upload_progress(position, size);
    }

    fn on_received_redirect(&mut self, redirect: &RedirectInfo, info: &ResponseInfo) -> bool {
        let follow = self.inner.on_received_redirect(redirect, info);
        log::info!(
            "[peer] {}: redirect {} {} -> {} ({})",
            self.id,
            redirect.status_code,
            redirect.new_method,
            redirect.new_url,
            if follow { "follow" } else { "suppressed" }
        );
        follow
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        log::info!(
            "[peer] {}: response status={} mime={:?} content_length={:?}",
            self.id,
            info.status,
            info.mime_type,
            info.content_length
        );
        self.inner.on_received_response(info);
    }

    fn on_downloaded_data(&mut self, len: u64, encoded_len: u64) {
        log::debug!("[peer] {}: downloaded len={} encoded={}", self.id, len, encoded_len);
        self.inner.on_downloaded_data(len, encoded_len);
    }

    fn on_received_data(&mut self, data: DataChunk) {
        log::debug!(
            "[peer] {}: data len={} encoded={}",
            self.id,
            data.len(),
            data.encoded_len()
        );
        self.inner.on_received_data(data);
    }

    fn on_received_cached_metadata(&mut self, data: &[u8]) {
        log::debug!("[peer] {}: cached metadata len={}", self.id, data.len());
        self.inner.on_received_cached_metadata(data);
    }

    fn on_completed_request(&mut self, completion: &CompletionInfo) {
        log::info!(
            "[peer] {}: completed {} total_transfer_size={}",
            self.id,
            net_error::name(completion.error_code),
            completion.total_transfer_size
        );
        self.inner.on_completed_request(completion);
    }

    fn on_received_completed_response(
        &mut self,
        info: &ResponseInfo,
        data: Option<DataChunk>,
        completion: &CompletionInfo,
    ) {
        log::info!(
            "[peer] {}: completed response status={} body={} {}",
            self.id,
            info.status,
            data.as_ref().map_or(0, DataChunk::len),
            net_error::name(completion.error_code)
        );
        self.inner.on_received_completed_response(info, data, completion);
    }
}
