use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::delivery::dispatcher::{Dispatcher, RequestOutcome};
use crate::delivery::session::RequestSession;
use crate::loader::config::DEFAULT_CHANNEL_CAPACITY;
use crate::loader::resource_loader::ResourceLoader;
use crate::peer::request_peer::RequestPeer;
use crate::types::types::{DeliveryError, LoadError, RequestId, RequestInfo};

/// Caller-side handle to a registered request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    cancel: CancellationToken,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Stops the transport and silences the peer. Safe from any task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct PendingLoad {
    id: RequestId,
    request: RequestInfo,
    cancel: CancellationToken,
}

/// Runs requests through a `ResourceLoader` and delivers their events to
/// peers.
///
/// Each request gets a session in the fetcher's dispatcher. `run` spawns one
/// loader task per request, all feeding a single event channel, and drains
/// that channel on the calling task, which therefore is the owning context of
/// every session and the only place peers are invoked from.
pub struct ResourceFetcher {
    loader: Arc<dyn ResourceLoader>,
    dispatcher: Dispatcher,
    pending: Vec<PendingLoad>,
    next_id: u64,
    channel_capacity: usize,
    shutdown: CancellationToken,
}

impl ResourceFetcher {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            loader,
            dispatcher: Dispatcher::new(),
            pending: Vec::new(),
            next_id: 1,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Cancels every request registered with this fetcher.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Id the next `add_request` call will assign.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next_id)
    }

    /// Registers a request and its peer. Must be called before `run()`.
    pub fn add_request(
        &mut self,
        request: RequestInfo,
        peer: impl RequestPeer + 'static,
    ) -> Result<RequestHandle, DeliveryError> {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let cancel = self.shutdown.child_token();
        let session = RequestSession::with_cancel_token(id, peer, cancel.clone());
        self.dispatcher.add(session)?;
        self.pending.push(PendingLoad {
            id,
            request,
            cancel: cancel.clone(),
        });

        log::debug!("[fetcher] registered {}", id);
        Ok(RequestHandle { id, cancel })
    }

    /// Loads every registered request and returns one outcome per request,
    /// in completion order.
    pub async fn run(&mut self) -> Vec<RequestOutcome> {
        let (events_tx, events_rx) = mpsc::channel(self.channel_capacity);

        let mut handles = Vec::with_capacity(self.pending.len());
        for load in self.pending.drain(..) {
            let loader = Arc::clone(&self.loader);
            let events = events_tx.clone();
            let id = load.id;
            let handle = tokio::spawn(async move {
                loader.load(load.id, load.request, events, load.cancel).await
            });
            handles.push((id, handle));
        }

        // Only loader tasks hold senders now; the channel closes when the last
        // one finishes.
        drop(events_tx);
        self.dispatcher.run(events_rx).await;

        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(LoadError::Cancelled)) => log::debug!("[fetcher] {} cancelled", id),
                Ok(Err(e)) => log::warn!("[fetcher] {} loader error: {}", id, e),
                Err(join_err) => log::error!("[fetcher] {} loader task failed: {}", id, join_err),
            }
        }

        self.dispatcher.finish()
    }
}
