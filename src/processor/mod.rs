//! The processor side: the endpoint that owns outbox records for the
//! sessions whose control messages it receives.
//!
//! A control message for session `S` either finds the outbox record for `S`
//! (its operations are dispatched and the record is marked dispatched) or
//! is retried with growing delays until the commit budget runs out, after
//! which `S` is tombstoned.

mod handler;
mod pipeline;
mod worker;

pub use handler::{MessageHandler, NoopHandler};
pub use pipeline::ReceivePipeline;
pub use worker::{Processor, ProcessorHandle, ProcessorStats};
