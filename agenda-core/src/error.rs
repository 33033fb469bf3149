//! Error types for the agenda core.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced to callers of the agenda core.
///
/// Cloneable so a single fetch outcome can be handed to every waiter
/// attached to the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgendaError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    #[error("Mutation rejected: {0}")]
    Conflict(String),

    #[error("Session expired, re-authentication required")]
    AuthExpired,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Domain constraint violations, reported before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Event start must be before its end")]
    StartNotBeforeEnd,

    #[error("Events cannot start more than {max_past_days} days in the past")]
    TooFarInPast { max_past_days: i64 },

    #[error("Unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Calendar name must not be empty")]
    EmptyCalendarName,

    #[error("No calendar given and no primary calendar exists")]
    NoCalendar,

    #[error("Invalid time window: start {start} is not before end {end}")]
    InvalidWindow { start: String, end: String },
}

/// A recurrence rule that could not be parsed or validated.
///
/// Never leaves the materializer: expansion degrades to the unexpanded master.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed recurrence rule '{rule}': {reason}")]
pub struct MalformedRuleError {
    pub rule: String,
    pub reason: String,
}

impl From<StoreError> for AgendaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => AgendaError::TransientFetch(msg),
            StoreError::Conflict(msg) => AgendaError::Conflict(msg),
            StoreError::AuthExpired => AgendaError::AuthExpired,
            StoreError::NotFound(id) => AgendaError::NotFound(id),
            StoreError::Decode(msg) => AgendaError::TransientFetch(msg),
        }
    }
}

/// Result type alias for agenda operations.
pub type AgendaResult<T> = Result<T, AgendaError>;
