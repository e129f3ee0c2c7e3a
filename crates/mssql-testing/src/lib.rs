//! # mssql-testing
//!
//! Test infrastructure for the session pool and connection facade.
//!
//! Nothing here opens a socket. [`MockFactory`] builds in-memory sessions
//! that answer statements from a script and write everything they do to a
//! shared journal, so tests can assert which statements ran, on which
//! session, and in what order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_testing::{MockFactory, MockResponse};
//! use tds_session::SqlValue;
//!
//! let factory = MockFactory::new()
//!     .with_response("SELECT 1", MockResponse::scalar(SqlValue::Int(1)))
//!     .fault_on("KILL");
//!
//! // Register `factory` with a PoolRegistry, open connections, then:
//! assert_eq!(factory.statements(), vec!["SELECT 1"]);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_session;

pub use fixtures::{credentials, session_target};
pub use mock_session::{JournalEntry, MockEvent, MockFactory, MockResponse, MockSession};
