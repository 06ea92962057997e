//! Error types for query fetches.

use thiserror::Error;

/// Failure of a query fetch, recorded in the query's cache entry.
///
/// Errors are cloned out to every reader of the entry, so they carry
/// rendered messages rather than source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Invalid params for query {name}: {reason}")]
    InvalidKey { name: String, reason: String },

    #[error("Query {name} is cached with a different value type")]
    TypeMismatch { name: String },

    #[error("Fetch for query {name} panicked: {message}")]
    Panicked { name: String, message: String },
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Result type alias for query fetches.
pub type FetchResult<T> = Result<T, FetchError>;
