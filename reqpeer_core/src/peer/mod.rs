pub mod logging;
pub mod request_peer;
pub mod snapshot;

pub use logging::LoggingPeer;
pub use request_peer::RequestPeer;
pub use snapshot::{format_bytes, TransferSnapshot};
