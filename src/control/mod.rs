//! Control-message protocol: codec, retry coordination and outcome
//! classification.
//!
//! ## Flow at the processor
//!
//! ```text
//! control message ──▶ OutcomeAdapter::enter (parse RetryState)
//!                          │
//!                          ▼
//!                   outbox record found? ── yes ──▶ dispatch recorded operations
//!                          │ no
//!                          ▼
//!                   RetryCoordinator
//!                     ├─ budget left  ──▶ delayed isolated successor, Retried
//!                     └─ exhausted    ──▶ GaveUp (tombstone)
//!                          │
//!                          ▼
//!                   OutcomeAdapter::classify
//!                     Completed → ack + Completed outcome
//!                     Retried   → ack (swallowed)
//!                     Failed    → propagate
//! ```

pub mod codec;
mod duration;
mod outcome;
mod retry;

pub use codec::{control_message, format_timestamp, parse_timestamp, CodecError, RetryState};
pub use duration::{format_duration, parse_duration};
#[cfg(feature = "emitter")]
pub use outcome::EmitterObserver;
pub use outcome::{
    CommitOutcome, IncomingContext, OutcomeAdapter, OutcomeObserver, ReceiveDisposition,
    RecordingObserver, StageOutcome, TracingObserver,
};
pub use retry::{next_retry_state, RetryCoordinator, RetryOutcome};
