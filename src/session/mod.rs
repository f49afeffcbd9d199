//! Connection lifecycle, capability negotiation and the operation queue.

mod capability;
mod manager;
mod queue;
mod state;

pub use self::manager::{DeviceManager, SessionHandle};
pub use self::queue::{OperationOutput, OperationResult, OperationTicket, QueuedOperation};
pub use self::state::{ConnectionState, DisconnectReason};
