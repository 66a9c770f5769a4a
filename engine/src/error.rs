//! Error types for the D2 engine.

use crate::{config::ConfigError, state::SyncEvent, ResourceType, SyncState, Uid};
use thiserror::Error;

/// All possible errors from the sync side of the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Network errors
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("server rejected {uid}: {message}")]
    ServerRejection { uid: Uid, message: String },

    // Local store errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("{resource} not found: {uid}")]
    NotFound { resource: ResourceType, uid: Uid },

    #[error("invalid record {uid}: {message}")]
    InvalidRecord { uid: Uid, message: String },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // State errors
    #[error("invalid state transition from {from} on {event:?}")]
    InvalidTransition { from: SyncState, event: SyncEvent },

    #[error("sync cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
}

impl Error {
    /// A transport failure worth retrying at the next scheduled sync.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Whether the failure may succeed on a later sync cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { retryable: true, .. })
    }

    /// Cycle-fatal errors abort the whole download or upload cycle instead of
    /// being recorded against a single item or combination.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Authentication(_)
                | Error::InvalidSnapshot(_)
                | Error::Serialization(_)
        )
    }
}

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("found {found} when expecting {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("found '{0}' when expecting a date")]
    DateParse(String),

    #[error("found '{0}' when expecting a number")]
    NumberParse(String),

    #[error("{function} expects {expected} arguments, got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("could not cast value to {expected}")]
    Cast { expected: &'static str },

    #[error("missing value: {0}")]
    MissingValue(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
