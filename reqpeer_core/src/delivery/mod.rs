pub mod dispatcher;
pub mod event;
pub mod received_data;
pub mod session;
pub mod state;

pub use dispatcher::{Dispatcher, RequestOutcome};
pub use event::{Envelope, EventReceiver, EventSender, TransportEvent};
pub use received_data::DataChunk;
pub use session::{RequestSession, SharedSession};
pub use state::{BodyMode, DeliveryMachine};
