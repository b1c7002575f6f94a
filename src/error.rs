use std::fmt;

use thiserror::Error;

/// Error type for sockbridge operations.
///
/// Connection-level failures (handshake rejection, transport disconnect) are
/// not represented here: they surface asynchronously as a `Close` envelope on
/// the event stream. This type covers the operations that can fail at the
/// call site.
#[derive(Error, Debug, Clone)]
pub enum SocketError {
    #[error("Failed to send on socket '{url}': {reason}")]
    SendFailed { url: String, reason: String },

    #[error("Failed to bind relay server: {reason}")]
    BindFailed { reason: String },

    #[error("Failed to accept WebSocket connection: {reason}")]
    AcceptFailed { reason: String },

    #[error("Relay server is already running")]
    ServerAlreadyRunning,

    #[error("Relay server is not running")]
    ServerNotRunning,
}

/// Type alias for sockbridge results
pub type SocketResult<T> = Result<T, SocketError>;

/// Create a send failed error
pub fn send_failed(url: impl Into<String>, reason: impl fmt::Display) -> SocketError {
    SocketError::SendFailed {
        url: url.into(),
        reason: reason.to_string(),
    }
}

/// Create a bind failed error
pub fn bind_failed(reason: impl fmt::Display) -> SocketError {
    SocketError::BindFailed {
        reason: reason.to_string(),
    }
}

/// Create an accept failed error
pub fn accept_failed(reason: impl fmt::Display) -> SocketError {
    SocketError::AcceptFailed {
        reason: reason.to_string(),
    }
}
