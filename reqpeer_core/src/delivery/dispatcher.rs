use std::collections::HashMap;

use serde::Serialize;

use crate::delivery::event::{Envelope, EventReceiver, TransportEvent};
use crate::delivery::session::RequestSession;
use crate::peer::snapshot::TransferSnapshot;
use crate::types::net_error;
use crate::types::types::{
    CompletionInfo, DeliveryError, DeliveryState, RequestId, ResponseInfo,
};

/// Final record of a request once its session has been retired.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub id: RequestId,
    pub state: DeliveryState,
    pub response: Option<ResponseInfo>,
    pub completion: Option<CompletionInfo>,
    pub snapshot: TransferSnapshot,
    /// Contract violation that ended the session, if any.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DeliveryError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<DeliveryError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl RequestOutcome {
    /// Collapses the outcome into the completion on success, or the reason it
    /// did not succeed.
    pub fn result(&self) -> Result<&CompletionInfo, DeliveryError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if self.state == DeliveryState::Cancelled {
            return Err(DeliveryError::Cancelled);
        }
        match &self.completion {
            Some(c) => match c.network_error() {
                Some(e) => Err(e),
                None => Ok(c),
            },
            None => Err(DeliveryError::Network(net_error::ERR_FAILED)),
        }
    }
}

/// Routes transport events to live sessions by request id.
///
/// Holds at most one live session per id. Sessions are retired as soon as
/// they reach a terminal state; later events for a retired or unknown id are
/// discarded. A delivery the session rejects is treated as fatal: the peer is
/// completed with `ERR_FAILED`, the violation is recorded in the outcome and
/// the session's cancellation handle is tripped so the transport stops
/// producing.
pub struct Dispatcher {
    sessions: HashMap<RequestId, RequestSession>,
    outcomes: Vec<RequestOutcome>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            outcomes: Vec::new(),
        }
    }

    /// Registers a session, starting it if the caller has not.
    pub fn add(&mut self, mut session: RequestSession) -> Result<(), DeliveryError> {
        let id = session.id();
        if self.sessions.contains_key(&id) {
            return Err(DeliveryError::DuplicateRequest(id));
        }
        if !session.is_started() {
            session.start()?;
        }
        self.sessions.insert(id, session);
        Ok(())
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn live(&self) -> usize {
        self.sessions.len()
    }

    pub fn outcomes(&self) -> &[RequestOutcome] {
        &self.outcomes
    }

    /// Cancels a live request. Unknown ids are already gone and succeed.
    pub fn cancel(&mut self, id: RequestId) -> Result<(), DeliveryError> {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.cancel()?;
            self.retire(id, None);
        }
        Ok(())
    }

    pub fn dispatch(&mut self, envelope: Envelope) -> Result<(), DeliveryError> {
        let Envelope { id, event } = envelope;

        let Some(session) = self.sessions.get_mut(&id) else {
            log::debug!("[dispatcher] discarding {} for retired {}", event.kind(), id);
            if let TransportEvent::Redirect { reply, .. } = event {
                let _ = reply.send(false);
            }
            return Ok(());
        };

        let kind = event.kind();
        match apply(session, event) {
            Ok(()) => {
                if session.is_terminal() {
                    self.retire(id, None);
                }
                Ok(())
            }
            Err(err) => {
                log::error!("[dispatcher] {}: {} rejected: {}", id, kind, err);
                if !session.is_terminal() {
                    let total = session.counters().encoded_bytes_received;
                    let failed = CompletionInfo::with_error(net_error::ERR_FAILED, total);
                    if let Err(e) = session.complete(failed) {
                        log::warn!("[dispatcher] {}: could not fail session: {}", id, e);
                    }
                }
                session.cancel_handle().cancel();
                self.retire(id, Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Drains the event channel until every transport has dropped its sender.
    pub async fn run(&mut self, mut events: EventReceiver) {
        while let Some(envelope) = events.recv().await {
            // Failures are logged and recorded in the outcome by dispatch().
            let _ = self.dispatch(envelope);
            self.sweep_cancelled();
        }
    }

    /// Retires sessions whose owner tripped the cancellation handle.
    fn sweep_cancelled(&mut self) {
        let cancelled: Vec<RequestId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.cancel_handle().is_cancelled())
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            if let Some(session) = self.sessions.get_mut(&id) {
                let _ = session.cancel();
            }
            self.retire(id, None);
        }
    }

    /// Retires every remaining session and hands back all outcomes.
    ///
    /// A session that is still open without having been cancelled lost its
    /// transport before completion; its peer is completed with `ERR_FAILED`
    /// so it still hears a terminal event.
    pub fn finish(&mut self) -> Vec<RequestOutcome> {
        let ids: Vec<RequestId> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = self.sessions.get_mut(&id) {
                if session.cancel_handle().is_cancelled() {
                    let _ = session.cancel();
                } else if !session.is_terminal() {
                    log::warn!("[dispatcher] {}: transport ended without completion", id);
                    let total = session.counters().encoded_bytes_received;
                    let _ = session.complete(CompletionInfo::with_error(net_error::ERR_FAILED, total));
                }
            }
            self.retire(id, None);
        }
        std::mem::take(&mut self.outcomes)
    }

    fn retire(&mut self, id: RequestId, error: Option<DeliveryError>) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.reclaim();
            log::debug!("[dispatcher] {}: retired in state {}", id, session.state());
            self.outcomes.push(RequestOutcome {
                id,
                state: session.state(),
                response: session.response_info().cloned(),
                completion: session.completion().cloned(),
                snapshot: session.snapshot(),
                error,
            });
        }
    }
}

/// Translates one transport event into the matching session operation.
fn apply(session: &mut RequestSession, event: TransportEvent) -> Result<(), DeliveryError> {
    match event {
        TransportEvent::UploadProgress { position, size } => {
            session.deliver_upload_progress(position, size)
        }
        TransportEvent::Redirect {
            redirect,
            info,
            reply,
        } => {
            let follow = session.deliver_redirect(&redirect, &info);
            let _ = reply.send(matches!(follow, Ok(true)));
            follow.map(|_| ())
        }
        TransportEvent::Response(info) => session.deliver_headers(info),
        TransportEvent::Data {
            payload,
            encoded_len,
        } => {
            let chunk = session.chunk(payload, encoded_len);
            session.deliver_chunk(chunk)
        }
        TransportEvent::DownloadedData { len, encoded_len } => {
            session.deliver_downloaded_bytes(len, encoded_len)
        }
        TransportEvent::CachedMetadata(data) => session.deliver_cached_metadata(&data),
        TransportEvent::Completed(completion) => session.complete(completion),
        TransportEvent::CompletedResponse {
            info,
            payload,
            completion,
        } => {
            let chunk = payload.map(|p| {
                let len = p.len() as u64;
                session.chunk(p, len)
            });
            session.deliver_completed_response(info, chunk, completion)
        }
    }
}
