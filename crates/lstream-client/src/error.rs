//! Error types for lstream client operations

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for lstream client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Coarse classification of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid options, unknown item names, invalid message parameters
    Configuration,
    /// The server rejected a control command
    Control,
    /// The stream ended because [`disconnect`](crate::Session::disconnect)
    /// closed the session
    SessionEnd,
    /// Network or stream level failure, including a session the server
    /// ended on its own
    Transport,
    /// The dispatch loop stopped on a failing callback
    Internal,
}

/// Errors that can occur during lstream client operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Item name is not part of the subscription
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// Server rejected a control command
    #[error("Control request '{operation}' rejected ({code}): {message}")]
    Control {
        operation: String,
        code: i32,
        message: String,
    },

    /// Server does not know the session a control command referred to
    #[error("Control request '{0}' failed: session unknown to server")]
    SyncError(String),

    /// Operation requires a connected session
    #[error("Session is not connected")]
    NotConnected,

    /// The session owning a subscription has been dropped
    #[error("Session has been dropped")]
    SessionDropped,

    /// The stream ended after the client destroyed the session
    #[error("Session ended by disconnect")]
    SessionEnded(Option<i32>),

    /// The dispatch loop stopped on a panicking callback
    #[error("Dispatch loop failed: {0}")]
    Dispatch(String),

    /// Stream or request failed at the transport level
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Create a control error for a rejected command
    pub fn control(operation: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::Control {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Config(_) => ErrorKind::Configuration,
            ClientError::UnknownItem(_) => ErrorKind::Configuration,
            ClientError::Control { .. } => ErrorKind::Control,
            ClientError::SyncError(_) => ErrorKind::Control,
            ClientError::NotConnected => ErrorKind::Transport,
            ClientError::SessionDropped => ErrorKind::Configuration,
            ClientError::Dispatch(_) => ErrorKind::Internal,
            ClientError::SessionEnded(_) => ErrorKind::SessionEnd,
            ClientError::Transport(_) => ErrorKind::Transport,
        }
    }
}
