//! Bus - messages, operations and transport contracts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 MessageSender (per endpoint)                 │
//! │  - route + stamp headers                                    │
//! │  - record into PendingOperations, or dispatch right away    │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Dispatcher + Listener Traits                  │
//! │  Dispatcher: dispatch(operations)                           │
//! │  Listener:   receive(queue, timeout)                        │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                  │
//!          ▼                                  ▼
//! ┌──────────────────┐              ┌─────────────────────┐
//! │InMemoryTransport │              │  Broker transports  │
//! │   (included)     │              │     (external)      │
//! └──────────────────┘              └─────────────────────┘
//! ```

mod dispatcher;
pub mod headers;
mod in_memory_queue;
mod message;
mod operation;
mod sender;

pub use dispatcher::{Dispatcher, Listener, TransportError};
pub use in_memory_queue::InMemoryTransport;
pub use message::{OutgoingMessage, TransportMessage};
pub use operation::{
    Destination, DispatchConsistency, PendingOperation, PendingOperations, TransportOperation,
};
pub use sender::{MessageSender, PublishOptions, SendOptions};
