//! Streaming response delivery between a resource loader and the peer that
//! consumes its notifications.
//!
//! Transports produce [`TransportEvent`]s; a [`RequestSession`] validates
//! their order against the delivery state machine and drives a
//! [`RequestPeer`]. [`ResourceFetcher`] ties an [`HttpLoader`] (or any other
//! [`ResourceLoader`]) to a [`Dispatcher`] holding one session per request.

pub mod delivery;
pub mod loader;
pub mod peer;
pub mod types;

pub use delivery::{
    BodyMode, DataChunk, DeliveryMachine, Dispatcher, Envelope, EventReceiver, EventSender,
    RequestOutcome, RequestSession, SharedSession, TransportEvent,
};
pub use loader::{
    HttpLoader, LoaderConfig, MetadataSource, RequestHandle, ResourceFetcher, ResourceLoader,
};
pub use peer::{format_bytes, LoggingPeer, RequestPeer, TransferSnapshot};
pub use peer::snapshot::TransferCounters;
pub use types::net_error;
pub use types::types::{
    AuthenticationInfo, CompletionInfo, DeliveryError, DeliveryState, LoadError, LoadTiming,
    RedirectInfo, RequestId, RequestInfo, ResponseInfo,
};
