//! Error types and result aliases for Tidemark.
//!
//! This module defines the shared error types used across all Tidemark
//! components. Coordinator-level conditions that are part of the normal
//! protocol (node exists, version mismatch, missing node) are **not**
//! errors; they are reported as enumerated outcomes by the coordinator
//! client. Only the classes below surface as `Err`.

/// The result type used throughout Tidemark.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tidemark operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection to the coordinator was lost mid-operation.
    ///
    /// The outcome of any in-flight request is unknown; callers must not
    /// assume success or failure of the operation that raised this.
    #[error("connection lost: {message}")]
    ConnectionLost {
        /// Description of the connection failure.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal invariant was violated.
    ///
    /// These indicate a logic error (an unexpected transaction response,
    /// an out-of-range bucket id) and are fatal to the current call.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

impl Error {
    /// Creates a new connection-lost error with the given message.
    #[must_use]
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Creates a new serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new invariant-violation error with the given message.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns whether this error is transient (safe to retry from the
    /// caller's point of view).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}
