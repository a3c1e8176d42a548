//! Error types for tidemark-queue operations.
//!
//! Per-file conditions (`AlreadyProcessed`, `AlreadyInFlight`, fencing loss,
//! permanent failure) are not errors; they are enumerated outcomes of the
//! state machine. The variants below cover the remaining classes: transient
//! coordinator failures that the scheduler may retry, configuration and
//! serialization problems, and invariant violations that are fatal to the
//! current call.

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors that can occur during queue coordination.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A transient coordinator failure; the outcome of any in-flight
    /// request is unknown and the caller decides whether to retry.
    #[error("transient coordinator error: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
    },

    /// Serialization/deserialization of a node payload failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The queue configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An encoded payload exceeds the coordinator's per-node limit.
    #[error("payload of {size} bytes exceeds the {limit}-byte node limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// The coordinator's per-node payload limit.
        limit: usize,
    },

    /// An internal invariant was violated (unexpected transaction response,
    /// out-of-range bucket id). Fatal to the current call.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

impl QueueError {
    /// Creates a new transient error with the given message.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a new configuration error with the given message.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
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

    /// Returns whether the scheduler may retry the failed call.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<tidemark_core::Error> for QueueError {
    fn from(err: tidemark_core::Error) -> Self {
        match err {
            tidemark_core::Error::ConnectionLost { message } => Self::Transient { message },
            tidemark_core::Error::Serialization { message } => Self::Serialization { message },
            tidemark_core::Error::InvariantViolation { message } => {
                Self::InvariantViolation { message }
            }
        }
    }
}
