use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::delivery::event::EventSender;
use crate::types::types::{LoadError, RequestId, RequestInfo};

/// Transport collaborator: turns one request into a stream of
/// `TransportEvent`s addressed to `id`.
///
/// Implementations must end every load that was not cancelled with exactly
/// one terminal event (`Completed` or `CompletedResponse`), report network
/// failures through its error code rather than through the returned error,
/// and stop producing as soon as `cancel` fires.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(
        &self,
        id: RequestId,
        request: RequestInfo,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), LoadError>;
}

/// Cache collaborator holding metadata previously generated for a resource.
/// Consulted at most once per request.
pub trait MetadataSource: Send + Sync {
    fn lookup(&self, url: &str) -> Option<Bytes>;
}
