//! Pool error types.

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Every session is in use and the pool is at its maximum size.
    #[error("pool exhausted: all {max} sessions are in use")]
    Exhausted {
        /// Maximum allowed sessions.
        max: u32,
    },

    /// No session was released within the wait timeout.
    #[error("session acquisition timeout after {0:?}")]
    AcquisitionTimeout(std::time::Duration),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if retrying later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::AcquisitionTimeout(_))
    }
}
