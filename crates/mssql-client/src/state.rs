//! Connection state and state-change events.
//!
//! ```text
//! Closed -> Open    (via open())
//! Open   -> Closed  (via close(); closing a closed connection is a no-op)
//! ```
//!
//! A connection can be reopened after it was closed. Each transition is
//! reported to the listeners registered with
//! [`Connection::on_state_change`](crate::Connection::on_state_change).

use std::fmt;

/// Runtime state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session is attached.
    #[default]
    Closed,
    /// A logged-in session is attached.
    Open,
}

impl ConnectionState {
    /// Check if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Lower-case state name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A completed state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
}

impl StateChange {
    pub(crate) fn new(previous: ConnectionState, current: ConnectionState) -> Self {
        Self { previous, current }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert!(!ConnectionState::Closed.is_open());
        assert!(ConnectionState::Open.is_open());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
