//! Error types for the channel-session core
//!
//! Validation errors (`Configuration`, `InvalidArgument`, `NotInitialized`,
//! `Disposed`) are returned straight to the caller. Transport problems met
//! during a join never surface here: they become
//! [`JoinOutcome::Failure`](crate::JoinOutcome::Failure) instead, since a
//! failed join is an outcome the caller is expected to branch on.

use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in the session core
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Bad or missing configuration (e.g. empty application id)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Caller supplied an invalid argument (e.g. empty channel name)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Operation issued before `initialize`
    #[error("Engine not initialized")]
    NotInitialized,

    /// Operation issued after `dispose`
    #[error("Session disposed")]
    Disposed,

    /// The underlying transport rejected or failed a call
    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    /// Deadline exceeded while waiting on the transport
    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: String, millis: u64 },

    /// Session internals are gone (worker task stopped unexpectedly)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Create a timeout error for `operation`
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis: timeout.as_millis() as u64,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error was raised by argument/state validation rather than
    /// by the transport
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::InvalidArgument { .. } | Self::NotInitialized | Self::Disposed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_message_carries_operation_and_millis() {
        let err = SessionError::timeout("leave_channel", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "leave_channel timed out after 1500 ms");
    }

    #[test]
    fn test_validation_classification() {
        assert!(SessionError::config("no app id").is_validation());
        assert!(SessionError::NotInitialized.is_validation());
        assert!(SessionError::Disposed.is_validation());
        assert!(!SessionError::transport("socket closed").is_validation());
        assert!(!SessionError::timeout("join_channel", Duration::from_secs(1)).is_validation());
    }
}
