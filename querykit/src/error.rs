// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Error taxonomy and retry classification
//!
//! Every failure that can come out of a session, a transaction, a result
//! stream or a unit of work is one [`Error`]. The retry coordinator only ever
//! looks at the [`ErrorClassification`] of an error, never at its message.

use thiserror::Error;

/// Result alias used throughout querykit
pub type Result<T> = std::result::Result<T, Error>;

/// How the retry coordinator treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    /// Retried regardless of idempotency (transport hiccups, overload)
    TransientRetriable,
    /// Optimistic-concurrency conflict; retried only for idempotent work
    ConflictRetriable,
    /// Never retried
    NonRetriable,
    /// Context cancelled or deadline exceeded; always terminal
    Cancelled,
}

impl ErrorClassification {
    /// Whether an error of this class may be retried under the given idempotency
    pub fn is_retriable(&self, idempotent: bool) -> bool {
        match self {
            ErrorClassification::TransientRetriable => true,
            ErrorClassification::ConflictRetriable => idempotent,
            ErrorClassification::NonRetriable | ErrorClassification::Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::TransientRetriable => "transient",
            ErrorClassification::ConflictRetriable => "conflict",
            ErrorClassification::NonRetriable => "non-retriable",
            ErrorClassification::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// querykit errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store overloaded: {0}")]
    Overloaded(String),

    #[error("Transaction locks invalidated: {0}")]
    Conflict(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Scheme error: {0}")]
    Scheme(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Multiple matches: expected one row, got {count}")]
    MultipleMatches { count: usize },

    #[error("Application error: {0}")]
    Application(String),

    #[error("{source} (attempts: {attempts})")]
    Attempted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap a terminal error with the number of attempts that were made
    pub fn attempted(attempts: u32, source: Error) -> Self {
        match source {
            // Never nest attempt annotations
            Error::Attempted { source, .. } => Error::Attempted { attempts, source },
            other => Error::Attempted {
                attempts,
                source: Box::new(other),
            },
        }
    }

    /// Static classification of this error
    pub fn classify(&self) -> ErrorClassification {
        match self {
            Error::Transport(_) | Error::Overloaded(_) => ErrorClassification::TransientRetriable,
            Error::Conflict(_) => ErrorClassification::ConflictRetriable,
            Error::Cancelled | Error::DeadlineExceeded => ErrorClassification::Cancelled,
            Error::Attempted { source, .. } => source.classify(),
            Error::Connection(_)
            | Error::TypeMismatch(_)
            | Error::Scheme(_)
            | Error::InvalidArgument(_)
            | Error::NotFound(_)
            | Error::MultipleMatches { .. }
            | Error::Application(_) => ErrorClassification::NonRetriable,
        }
    }

    /// Number of attempts recorded on a terminal coordinator error
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::Attempted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The underlying error with any attempt annotation removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Attempted { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Error::Conflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        self.classify() == ErrorClassification::Cancelled
    }

    /// Overload errors back off on the slow schedule
    pub(crate) fn wants_slow_backoff(&self) -> bool {
        matches!(self.root(), Error::Overloaded(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::TypeMismatch(error.to_string())
    }
}
