//! Session error types.

use thiserror::Error;

/// Errors reported by a protocol session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Login or handshake was rejected.
    #[error("login failed: {0}")]
    Connect(String),

    /// The server rejected a statement. The session itself is still usable.
    #[error("statement failed: {0}")]
    Execute(String),

    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// The transport closed underneath the session.
    #[error("transport closed")]
    Closed,

    /// The token stream could not be interpreted.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Check if this error leaves the session permanently unusable.
    ///
    /// A fatal session must be evicted from its pool instead of being
    /// handed to another caller.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed | Self::Protocol(_) | Self::Io(_))
    }
}
