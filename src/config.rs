//! Endpoint-level settings for transactional sessions.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::control::{parse_duration, CodecError};
use crate::error::UsageError;

pub const DEFAULT_MAXIMUM_COMMIT_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_COMMIT_DELAY_INCREMENT: Duration = Duration::from_secs(2);
pub const DEFAULT_ERROR_QUEUE: &str = "error";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {name}: {source}")]
    Duration {
        name: &'static str,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Usage(#[from] UsageError),
}

/// Configuration shared by every session an endpoint opens.
///
/// ```
/// use transactional_session::SessionConfig;
///
/// let config = SessionConfig::new()
///     .with_local_address("orders")
///     .with_route("ChargeCard", "billing");
/// assert_eq!(config.resolved_processor_address().unwrap(), "orders");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Input queue of this endpoint. `None` for a send-only endpoint.
    pub local_address: Option<String>,
    /// Where control messages go. Defaults to `local_address`.
    pub processor_address: Option<String>,
    pub outbox_enabled: bool,
    pub maximum_commit_duration: Duration,
    pub commit_delay_increment: Duration,
    pub error_queue: String,
    /// Message type to destination queue.
    pub routes: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_address: None,
            processor_address: None,
            outbox_enabled: true,
            maximum_commit_duration: DEFAULT_MAXIMUM_COMMIT_DURATION,
            commit_delay_increment: DEFAULT_COMMIT_DELAY_INCREMENT,
            error_queue: DEFAULT_ERROR_QUEUE.to_string(),
            routes: HashMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }

    pub fn with_processor_address(mut self, address: impl Into<String>) -> Self {
        self.processor_address = Some(address.into());
        self
    }

    pub fn with_outbox(mut self, enabled: bool) -> Self {
        self.outbox_enabled = enabled;
        self
    }

    pub fn with_maximum_commit_duration(mut self, duration: Duration) -> Self {
        self.maximum_commit_duration = duration;
        self
    }

    pub fn with_commit_delay_increment(mut self, increment: Duration) -> Self {
        self.commit_delay_increment = increment;
        self
    }

    pub fn with_error_queue(mut self, queue: impl Into<String>) -> Self {
        self.error_queue = queue.into();
        self
    }

    pub fn with_route(mut self, message_type: impl Into<String>, queue: impl Into<String>) -> Self {
        self.routes.insert(message_type.into(), queue.into());
        self
    }

    /// Check the commit delay increment and the combination of outbox flag
    /// and addresses.
    pub fn validate(&self) -> Result<(), UsageError> {
        if self.commit_delay_increment.is_zero() {
            return Err(UsageError::ZeroDuration {
                name: "commit_delay_increment",
            });
        }
        if self.processor_address.is_some() && !self.outbox_enabled {
            return Err(UsageError::ProcessorAddressWithoutOutbox);
        }
        if self.outbox_enabled && self.processor_address.is_none() && self.local_address.is_none()
        {
            return Err(UsageError::MissingProcessorAddress);
        }
        Ok(())
    }

    /// The queue control messages are sent to.
    pub fn resolved_processor_address(&self) -> Result<String, UsageError> {
        self.validate()?;
        self.processor_address
            .clone()
            .or_else(|| self.local_address.clone())
            .ok_or(UsageError::MissingProcessorAddress)
    }

    /// Load from JSON. Durations are ISO-8601 strings such as `"PT15S"`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use transactional_session::SessionConfig;
    ///
    /// let config = SessionConfig::from_json(
    ///     r#"{ "local_address": "orders", "maximum_commit_duration": "PT30S" }"#,
    /// )
    /// .unwrap();
    /// assert_eq!(config.maximum_commit_duration, Duration::from_secs(30));
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let defaults = SessionConfig::default();

        let config = SessionConfig {
            local_address: raw.local_address,
            processor_address: raw.processor_address,
            outbox_enabled: raw.outbox_enabled.unwrap_or(defaults.outbox_enabled),
            maximum_commit_duration: read_duration(
                "maximum_commit_duration",
                raw.maximum_commit_duration.as_deref(),
                defaults.maximum_commit_duration,
            )?,
            commit_delay_increment: read_duration(
                "commit_delay_increment",
                raw.commit_delay_increment.as_deref(),
                defaults.commit_delay_increment,
            )?,
            error_queue: raw.error_queue.unwrap_or(defaults.error_queue),
            routes: raw.routes,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize)]
struct RawConfig {
    local_address: Option<String>,
    processor_address: Option<String>,
    outbox_enabled: Option<bool>,
    maximum_commit_duration: Option<String>,
    commit_delay_increment: Option<String>,
    error_queue: Option<String>,
    #[serde(default)]
    routes: HashMap<String, String>,
}

fn read_duration(
    name: &'static str,
    text: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(text) = text else {
        return Ok(default);
    };
    let delta = parse_duration(text).map_err(|source| ConfigError::Duration { name, source })?;
    delta
        .to_std()
        .map_err(|_| ConfigError::Usage(UsageError::NegativeDuration { name }))
}
