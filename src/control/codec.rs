//! Control-message codec: the headers that carry retry state on the wire.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use thiserror::Error;

use super::duration::{format_duration, parse_duration};
use crate::bus::{headers, TransportMessage};

pub const REMAINING_COMMIT_DURATION: &str = "transactional-session.remaining-commit-duration";
pub const COMMIT_DELAY_INCREMENT: &str = "transactional-session.commit-delay-increment";
pub const ATTEMPT: &str = "transactional-session.attempt";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid attempt: {0:?}")]
    InvalidAttempt(String),
    #[error("duration out of range")]
    DurationOutOfRange,
}

/// Retry state carried by a control message.
///
/// Parsed fresh on every delivery and replaced by the next state on every
/// retry; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    /// The session id, which is also the control message id.
    pub session_id: String,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    pub remaining_commit_duration: TimeDelta,
    pub commit_delay_increment: TimeDelta,
    pub time_sent: Option<DateTime<Utc>>,
}

impl RetryState {
    /// State for the first control message of a session.
    pub fn initial(
        session_id: impl Into<String>,
        maximum_commit_duration: Duration,
        commit_delay_increment: Duration,
        time_sent: Option<DateTime<Utc>>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: session_id.into(),
            attempt: 1,
            remaining_commit_duration: to_delta(maximum_commit_duration)?,
            commit_delay_increment: to_delta(commit_delay_increment)?,
            time_sent,
        })
    }

    /// Parse the codec headers of `message`.
    ///
    /// Returns `Ok(None)` when the message carries no codec headers at all.
    pub fn parse(message: &TransportMessage) -> Result<Option<Self>, CodecError> {
        let remaining = message.header(REMAINING_COMMIT_DURATION);
        let increment = message.header(COMMIT_DELAY_INCREMENT);

        let (remaining, increment) = match (remaining, increment) {
            (None, None) => return Ok(None),
            (Some(remaining), Some(increment)) => (remaining, increment),
            (None, Some(_)) => return Err(CodecError::MissingHeader(REMAINING_COMMIT_DURATION)),
            (Some(_), None) => return Err(CodecError::MissingHeader(COMMIT_DELAY_INCREMENT)),
        };

        let attempt = match message.header(ATTEMPT) {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| CodecError::InvalidAttempt(value.to_string()))?,
            None => 1,
        };

        let time_sent = message
            .header(headers::TIME_SENT)
            .map(parse_timestamp)
            .transpose()?;

        let remaining_commit_duration = parse_duration(remaining)?;
        let commit_delay_increment = parse_duration(increment)?;
        // A zero increment would re-dispatch without delay.
        if commit_delay_increment <= TimeDelta::zero() {
            return Err(CodecError::InvalidDuration(increment.to_string()));
        }

        Ok(Some(Self {
            session_id: message.id.clone(),
            attempt,
            remaining_commit_duration,
            commit_delay_increment,
            time_sent,
        }))
    }

    /// Write the codec headers, replacing any previous values.
    pub fn write_headers(&self, target: &mut HashMap<String, String>) {
        target.insert(
            REMAINING_COMMIT_DURATION.to_string(),
            format_duration(self.remaining_commit_duration),
        );
        target.insert(
            COMMIT_DELAY_INCREMENT.to_string(),
            format_duration(self.commit_delay_increment),
        );
        target.insert(ATTEMPT.to_string(), self.attempt.to_string());
        match self.time_sent {
            Some(sent) => {
                target.insert(headers::TIME_SENT.to_string(), format_timestamp(sent));
            }
            None => {
                target.remove(headers::TIME_SENT);
            }
        }
    }

    /// Whether the commit budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_commit_duration <= TimeDelta::zero()
    }
}

/// Build the body-less control message for a session.
///
/// Caller metadata is copied verbatim; codec headers and the control marker
/// win over metadata with the same name.
pub fn control_message(state: &RetryState, metadata: &HashMap<String, String>) -> TransportMessage {
    let mut message_headers = metadata.clone();
    message_headers.insert(headers::MESSAGE_ID.to_string(), state.session_id.clone());
    message_headers.insert(headers::CONTROL_MESSAGE.to_string(), "true".to_string());
    state.write_headers(&mut message_headers);
    TransportMessage::new(state.session_id.clone(), message_headers, Vec::new())
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CodecError::InvalidTimestamp(text.to_string()))
}

fn to_delta(duration: Duration) -> Result<TimeDelta, CodecError> {
    TimeDelta::from_std(duration).map_err(|_| CodecError::DurationOutOfRange)
}
