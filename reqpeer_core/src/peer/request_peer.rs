use crate::delivery::received_data::DataChunk;
use crate::types::types::{CompletionInfo, RedirectInfo, ResponseInfo};

/// Consumer of load-progress notifications for one request.
///
/// A `RequestSession` calls these methods synchronously, from the context that
/// owns the session, in an order it has already validated:
///
/// - `on_upload_progress` zero or more times, never after completion.
/// - `on_received_redirect` once per redirect hop, before any response.
///   Returning `false` suppresses the redirect.
/// - `on_received_response` at most once, before any body notification.
/// - Either `on_received_data` or `on_downloaded_data` zero or more times,
///   never both for the same request.
/// - `on_received_cached_metadata` zero or one times; not being called means
///   there is no metadata.
/// - `on_completed_request` exactly once, last. No call follows it.
///
/// `on_received_completed_response` replaces the response/data/completed trio
/// when the whole response is available at once. When it fires, none of the
/// three individual methods fire for that request.
///
/// After the session is cancelled no method is called again.
pub trait RequestPeer: Send {
    fn on_upload_progress(&mut self, position: u64, size: u64);

    fn on_received_redirect(&mut self, redirect: &RedirectInfo, info: &ResponseInfo) -> bool;

    fn on_received_response(&mut self, info: &ResponseInfo);

    /// Body bytes were written to external storage instead of being handed over.
    fn on_downloaded_data(&mut self, len: u64, encoded_len: u64);

    /// The chunk may be read from any thread, but should be dropped on the
    /// calling thread; drops elsewhere are routed back to the session.
    fn on_received_data(&mut self, data: DataChunk);

    fn on_received_cached_metadata(&mut self, _data: &[u8]) {}

    fn on_completed_request(&mut self, completion: &CompletionInfo);

    fn on_received_completed_response(
        &mut self,
        info: &ResponseInfo,
        data: Option<DataChunk>,
        completion: &CompletionInfo,
    );
}

impl<P: RequestPeer + ?Sized> RequestPeer for Box<P> {
    fn on_upload_progress(&mut self, position: u64, size: u64) {
        (**self).on_upload_progress(position, size)
    }

    fn on_received_redirect(&mut self, redirect: &RedirectInfo, info: &ResponseInfo) -> bool {
        (**self).on_received_redirect(redirect, info)
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        (**self).on_received_response(info)
    }

    fn on_downloaded_data(&mut self, len: u64, encoded_len: u64) {
        (**self).on_downloaded_data(len, encoded_len)
    }

    fn on_received_data(&mut self, data: DataChunk) {
        (**self).on_received_data(data)
    }

    fn on_received_cached_metadata(&mut self, data: &[u8]) {
        (**self).on_received_cached_metadata(data)
    }

    fn on_completed_request(&mut self, completion: &CompletionInfo) {
        (**self).on_completed_request(completion)
    }

    fn on_received_completed_response(
        &mut self,
        info: &ResponseInfo,
        data: Option<DataChunk>,
        completion: &CompletionInfo,
    ) {
        (**self).on_received_completed_response(info, data, completion)
    }
}
