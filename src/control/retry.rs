//! Retry coordinator for redelivered control messages.
//!
//! A control message that reaches the processor before the outbox record
//! exists is re-sent to the processor with a growing delay until the commit
//! budget is exhausted, at which point the coordinator gives up and the
//! session id is tombstoned.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::codec::RetryState;
use super::outcome::{CommitOutcome, OutcomeObserver};
use crate::bus::{Destination, Dispatcher, TransportMessage, TransportOperation};
use crate::error::ProcessingError;

/// What the coordinator did with a delivery.
#[derive(Debug)]
pub enum RetryOutcome {
    /// Not a control message in retry; run normal processing.
    Continue,
    /// The budget is exhausted. The delivery is fully handled and must not
    /// reach normal processing.
    GaveUp,
    /// A delayed successor was dispatched; stop without error.
    Retried,
    Failed(ProcessingError),
}

/// Compute the state of the successor control message.
///
/// The delay increment doubles and is capped at the remaining budget. The
/// elapsed time is measured from `time_sent` when present; otherwise the
/// previous increment is assumed to have elapsed.
pub fn next_retry_state(state: &RetryState, now: DateTime<Utc>) -> RetryState {
    let doubled = state
        .commit_delay_increment
        .checked_add(&state.commit_delay_increment)
        .unwrap_or(TimeDelta::MAX);
    let next_increment = doubled.min(state.remaining_commit_duration);

    let elapsed = match state.time_sent {
        Some(sent) => (now - sent).max(TimeDelta::zero()),
        None => state.commit_delay_increment,
    };
    let next_remaining = state
        .remaining_commit_duration
        .checked_sub(&elapsed)
        .unwrap_or(TimeDelta::MIN);

    RetryState {
        session_id: state.session_id.clone(),
        attempt: state.attempt.saturating_add(1),
        remaining_commit_duration: next_remaining,
        commit_delay_increment: next_increment,
        time_sent: Some(now),
    }
}

/// Decides, per delivery, whether to retry with delay, give up, or let the
/// message through.
#[derive(Clone)]
pub struct RetryCoordinator {
    dispatcher: Arc<dyn Dispatcher>,
    processor_address: String,
    observer: Arc<dyn OutcomeObserver>,
}

impl RetryCoordinator {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        processor_address: impl Into<String>,
        observer: Arc<dyn OutcomeObserver>,
    ) -> Self {
        Self {
            dispatcher,
            processor_address: processor_address.into(),
            observer,
        }
    }

    pub fn processor_address(&self) -> &str {
        &self.processor_address
    }

    pub async fn invoke(
        &self,
        message: &TransportMessage,
        state: Option<&RetryState>,
    ) -> RetryOutcome {
        self.invoke_at(message, state, Utc::now()).await
    }

    /// Same as [`invoke`](Self::invoke) with an explicit clock reading.
    pub async fn invoke_at(
        &self,
        message: &TransportMessage,
        state: Option<&RetryState>,
        now: DateTime<Utc>,
    ) -> RetryOutcome {
        let Some(state) = state else {
            return RetryOutcome::Continue;
        };

        if state.is_exhausted() {
            warn!(
                session_id = %state.session_id,
                attempt = state.attempt,
                "commit budget exhausted without an outbox record; tombstoning the session id"
            );
            self.observer.record(&CommitOutcome::GaveUp {
                session_id: state.session_id.clone(),
                attempts: state.attempt,
            });
            return RetryOutcome::GaveUp;
        }

        let next = next_retry_state(state, now);
        let delay = next.commit_delay_increment.to_std().unwrap_or_default();

        let mut successor = message.clone();
        next.write_headers(&mut successor.headers);

        let operation = TransportOperation::new(
            successor,
            Destination::Queue(self.processor_address.clone()),
        )
        .with_delay(delay)
        .isolated();

        if let Err(err) = self.dispatcher.dispatch(vec![operation]).await {
            return RetryOutcome::Failed(err.into());
        }

        debug!(
            session_id = %state.session_id,
            attempt = next.attempt,
            delay_ms = delay.as_millis() as u64,
            remaining_ms = next.remaining_commit_duration.num_milliseconds(),
            "outbox record not found yet; scheduled control message retry"
        );
        self.observer.record(&CommitOutcome::Retried {
            session_id: state.session_id.clone(),
            attempts: state.attempt,
        });
        RetryOutcome::Retried
    }
}
