//! Client error types.

use mssql_driver_pool::PoolError;
use tds_session::SessionError;
use thiserror::Error;

use crate::state::ConnectionState;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Pool error other than exhaustion.
    #[error("pool error: {0}")]
    Pool(#[source] PoolError),

    /// The protocol session reported an error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Login did not complete within the connect timeout.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The operation is not allowed in the connection's current state.
    #[error("cannot {operation} while the connection is {state}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// State the connection was in.
        state: ConnectionState,
    },

    /// A transaction is already open on this connection.
    #[error("connection already has an open transaction; parallel transactions are not supported")]
    ParallelTransaction,

    /// The transaction was already committed or rolled back.
    #[error("transaction is no longer open")]
    TransactionNotOpen,

    /// The reader was closed or superseded by another statement.
    #[error("reader is closed")]
    ReaderClosed,

    /// The connection this object belongs to has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Invalid identifier (potential SQL injection attempt).
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Column index past the end of the current row.
    #[error("column index {index} out of range for a row of {count} columns")]
    ColumnOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of columns in the row.
        count: usize,
    },
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => Self::PoolExhausted,
            other => Self::Pool(other),
        }
    }
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// Pool exhaustion, timeouts, and connection-level session faults are
    /// transient. Usage errors never are.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted | Self::ConnectionTimeout => true,
            Self::Pool(err) => err.is_transient(),
            Self::Session(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Check if this error reports a misuse of the API rather than a
    /// failure of the server or the pool.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::ParallelTransaction
                | Self::TransactionNotOpen
                | Self::ReaderClosed
                | Self::ConnectionClosed
                | Self::InvalidIdentifier(_)
                | Self::ColumnOutOfRange { .. }
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
