//! Commit outcomes and the adapter that classifies how a receive ended.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use super::codec::RetryState;
use crate::bus::TransportMessage;
use crate::error::{ProcessingError, ProcessingResult};

/// Observable signal about a session's commit, as seen at the processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// A control-message delivery completed normally.
    Completed { session_id: String, attempts: u32 },
    /// The retry budget ran out; the session id is now tombstoned.
    GaveUp { session_id: String, attempts: u32 },
    /// A delayed successor control message was scheduled.
    Retried { session_id: String, attempts: u32 },
}

impl CommitOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            CommitOutcome::Completed { session_id, .. }
            | CommitOutcome::GaveUp { session_id, .. }
            | CommitOutcome::Retried { session_id, .. } => session_id,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CommitOutcome::Completed { attempts, .. }
            | CommitOutcome::GaveUp { attempts, .. }
            | CommitOutcome::Retried { attempts, .. } => *attempts,
        }
    }

    /// Event name used when the outcome is emitted.
    pub fn name(&self) -> &'static str {
        match self {
            CommitOutcome::Completed { .. } => "transactional_session.commit.completed",
            CommitOutcome::GaveUp { .. } => "transactional_session.commit.gave_up",
            CommitOutcome::Retried { .. } => "transactional_session.commit.retried",
        }
    }
}

/// Receives commit outcomes (metrics, notifications, test assertions).
pub trait OutcomeObserver: Send + Sync {
    fn record(&self, outcome: &CommitOutcome);
}

/// Logs outcomes through `tracing`. The default observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl OutcomeObserver for TracingObserver {
    fn record(&self, outcome: &CommitOutcome) {
        info!(
            outcome = outcome.name(),
            session_id = %outcome.session_id(),
            attempts = outcome.attempts(),
            "commit outcome"
        );
    }
}

/// Keeps every outcome in a shared buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    buffer: Arc<Mutex<Vec<CommitOutcome>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<CommitOutcome> {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    pub fn completed(&self) -> Vec<CommitOutcome> {
        self.filtered(|o| matches!(o, CommitOutcome::Completed { .. }))
    }

    pub fn gave_up(&self) -> Vec<CommitOutcome> {
        self.filtered(|o| matches!(o, CommitOutcome::GaveUp { .. }))
    }

    pub fn retried(&self) -> Vec<CommitOutcome> {
        self.filtered(|o| matches!(o, CommitOutcome::Retried { .. }))
    }

    fn filtered(&self, keep: impl Fn(&CommitOutcome) -> bool) -> Vec<CommitOutcome> {
        self.outcomes().into_iter().filter(|o| keep(o)).collect()
    }
}

impl OutcomeObserver for RecordingObserver {
    fn record(&self, outcome: &CommitOutcome) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(outcome.clone());
        }
    }
}

/// Emits outcomes via an `EventEmitter` for in-process listeners.
///
/// The payload is the JSON form of the [`CommitOutcome`], emitted under
/// [`CommitOutcome::name`].
#[cfg(feature = "emitter")]
pub struct EmitterObserver {
    emitter: Mutex<event_emitter_rs::EventEmitter>,
}

#[cfg(feature = "emitter")]
impl EmitterObserver {
    pub fn new(emitter: event_emitter_rs::EventEmitter) -> Self {
        Self {
            emitter: Mutex::new(emitter),
        }
    }
}

#[cfg(feature = "emitter")]
impl OutcomeObserver for EmitterObserver {
    fn record(&self, outcome: &CommitOutcome) {
        let payload = match serde_json::to_string(outcome) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize commit outcome");
                return;
            }
        };
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.emit(outcome.name(), payload);
        }
    }
}

/// Per-message context built when a physical message enters the pipeline.
#[derive(Clone, Debug)]
pub struct IncomingContext {
    message: TransportMessage,
    retry_state: Option<RetryState>,
}

impl IncomingContext {
    pub fn message(&self) -> &TransportMessage {
        &self.message
    }

    /// Retry state parsed from the codec headers, if any.
    pub fn retry_state(&self) -> Option<&RetryState> {
        self.retry_state.as_ref()
    }

    pub fn into_message(self) -> TransportMessage {
        self.message
    }
}

/// How the stages behind the adapter ended.
#[derive(Debug)]
pub enum StageOutcome {
    /// Processing finished normally.
    Completed,
    /// A successor control message was scheduled; this delivery is done.
    Retried,
    Failed(ProcessingError),
}

/// What the transport should do with the physical message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveDisposition {
    /// Processed; acknowledge.
    Completed,
    /// Replaced by a delayed successor; acknowledge.
    RetryScheduled,
}

/// Wraps the whole receive of a physical message.
///
/// Parses retry state on entry, then turns the stage outcome into a
/// disposition: the retry signal is swallowed, genuine failures propagate
/// unchanged, and normal completion of a control message is recorded as
/// [`CommitOutcome::Completed`] with the attempt it took.
#[derive(Clone)]
pub struct OutcomeAdapter {
    observer: Arc<dyn OutcomeObserver>,
}

impl OutcomeAdapter {
    pub fn new(observer: Arc<dyn OutcomeObserver>) -> Self {
        Self { observer }
    }

    /// Parse the codec headers into a per-message context.
    ///
    /// Malformed codec headers are logged and the message is treated as an
    /// ordinary one.
    pub fn enter(&self, message: TransportMessage) -> IncomingContext {
        let retry_state = match RetryState::parse(&message) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    error = %err,
                    "ignoring malformed control-message headers"
                );
                None
            }
        };
        IncomingContext {
            message,
            retry_state,
        }
    }

    /// Run `next` inside the adapter.
    pub async fn invoke<F, Fut>(
        &self,
        message: TransportMessage,
        next: F,
    ) -> ProcessingResult<ReceiveDisposition>
    where
        F: FnOnce(IncomingContext) -> Fut,
        Fut: Future<Output = StageOutcome>,
    {
        let context = self.enter(message);
        let tracked = context
            .retry_state()
            .map(|state| (state.session_id.clone(), state.attempt));

        let outcome = next(context).await;
        self.classify(tracked, outcome)
    }

    fn classify(
        &self,
        tracked: Option<(String, u32)>,
        outcome: StageOutcome,
    ) -> ProcessingResult<ReceiveDisposition> {
        match outcome {
            StageOutcome::Completed => {
                if let Some((session_id, attempts)) = tracked {
                    self.observer.record(&CommitOutcome::Completed {
                        session_id,
                        attempts,
                    });
                }
                Ok(ReceiveDisposition::Completed)
            }
            StageOutcome::Retried => Ok(ReceiveDisposition::RetryScheduled),
            StageOutcome::Failed(err) => Err(err),
        }
    }
}
