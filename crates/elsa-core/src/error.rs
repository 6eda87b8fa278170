//! Error types shared across the query model.

use thiserror::Error;

/// Rejections raised synchronously while editing a [`crate::Query`].
///
/// A query is never modified by an operation that returns one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("added term without a field")]
    MissingField,

    #[error("Cannot parse term: '{0}'")]
    MalformedTerm(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value {value} for field {field}")]
    InvalidValue { field: String, value: String },

    #[error("Unknown input_validation: {0}")]
    UnknownValidation(String),

    #[error("invalid value {value} given for meta {key}")]
    InvalidMeta { key: String, value: String },

    #[error("Invalid boolean given: {0}")]
    InvalidBoolean(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Start time greater than end time")]
    InvalidTimeRange,
}

/// Errors raised by result session bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No result session with local id {0}")]
    UnknownSession(u64),

    #[error("Unable to find local result for tab {0}")]
    UnknownTab(usize),

    #[error("Session {id} is {state}, expected {expected}")]
    InvalidState {
        id: u64,
        state: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Query(#[from] QueryError),
}
