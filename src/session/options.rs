use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::TimeDelta;
use uuid::Uuid;

use crate::config::{
    SessionConfig, DEFAULT_COMMIT_DELAY_INCREMENT, DEFAULT_MAXIMUM_COMMIT_DURATION,
};
use crate::error::UsageError;
use crate::storage::PersistenceHints;

/// Type-keyed bag of process-local values attached to a session.
///
/// Never serialized and never sent on the wire.
#[derive(Default)]
pub struct Extensions {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Options applied when a session is opened.
#[derive(Debug)]
pub struct OpenOptions {
    session_id: Option<String>,
    maximum_commit_duration: Duration,
    commit_delay_increment: Duration,
    metadata: HashMap<String, String>,
    extensions: Extensions,
    hints: PersistenceHints,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            maximum_commit_duration: DEFAULT_MAXIMUM_COMMIT_DURATION,
            commit_delay_increment: DEFAULT_COMMIT_DELAY_INCREMENT,
            metadata: HashMap::new(),
            extensions: Extensions::new(),
            hints: PersistenceHints::default(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options starting from the commit durations of `config`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            maximum_commit_duration: config.maximum_commit_duration,
            commit_delay_increment: config.commit_delay_increment,
            ..Self::default()
        }
    }

    /// Use a caller-supplied session id instead of a generated one.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
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

    /// Signed variant of [`with_maximum_commit_duration`](Self::with_maximum_commit_duration).
    pub fn try_with_maximum_commit_duration(self, duration: TimeDelta) -> Result<Self, UsageError> {
        let duration = non_negative("maximum_commit_duration", duration)?;
        Ok(self.with_maximum_commit_duration(duration))
    }

    /// Signed variant of [`with_commit_delay_increment`](Self::with_commit_delay_increment).
    pub fn try_with_commit_delay_increment(self, increment: TimeDelta) -> Result<Self, UsageError> {
        let increment = non_negative("commit_delay_increment", increment)?;
        if increment.is_zero() {
            return Err(UsageError::ZeroDuration {
                name: "commit_delay_increment",
            });
        }
        Ok(self.with_commit_delay_increment(increment))
    }

    /// Metadata is copied onto the control message as headers.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    pub fn with_hints(mut self, hints: PersistenceHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn maximum_commit_duration(&self) -> Duration {
        self.maximum_commit_duration
    }

    pub fn commit_delay_increment(&self) -> Duration {
        self.commit_delay_increment
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn hints(&self) -> &PersistenceHints {
        &self.hints
    }

    pub(crate) fn validate_durations(&self) -> Result<(), UsageError> {
        if self.commit_delay_increment.is_zero() {
            return Err(UsageError::ZeroDuration {
                name: "commit_delay_increment",
            });
        }
        Ok(())
    }

    /// Validate the supplied session id, or generate a new one.
    pub(crate) fn resolve_session_id(&self) -> Result<String, UsageError> {
        match &self.session_id {
            Some(id) if id.trim().is_empty() => Err(UsageError::InvalidSessionId(id.clone())),
            Some(id) => Ok(id.clone()),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }
}

fn non_negative(name: &'static str, value: TimeDelta) -> Result<Duration, UsageError> {
    value
        .to_std()
        .map_err(|_| UsageError::NegativeDuration { name })
}
