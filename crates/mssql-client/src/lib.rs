//! # mssql-client
//!
//! Pooled SQL Server connections.
//!
//! This is the primary public API surface for the workspace. A
//! [`Connection`] is a cheap handle; the expensive, logged-in protocol
//! session behind it is borrowed from a [`PoolRegistry`] when the connection
//! opens and returned when it closes.
//!
//! ## Features
//!
//! - **Pooling**: one bounded pool per normalized target key, with lazy
//!   warm-up and immediate (or bounded-wait) exhaustion
//! - **Connection state machine**: `Closed -> Open -> Closed`, reopenable,
//!   idempotent close, state-change listeners
//! - **Transactions**: one open transaction per connection, savepoints, and
//!   implicit rollback on close
//! - **Readers**: at most one live reader per connection; the next statement
//!   invalidates it
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mssql_client::{Connection, IsolationLevel, PoolRegistry, ProtocolFactories};
//!
//! let registry = PoolRegistry::new(ProtocolFactories::new(Arc::new(my_factory)));
//!
//! let conn = Connection::from_connection_string(
//!     "Server=localhost;Database=test;User Id=sa;Password=Password123;Max Pool Size=10",
//!     registry.clone(),
//! )?;
//! conn.open().await?;
//!
//! let mut reader = conn.create_command("SELECT id, name FROM users")?
//!     .execute_reader()
//!     .await?;
//! while reader.read().await? {
//!     println!("{:?}", reader.values()?);
//! }
//!
//! let tx = conn.begin_transaction(IsolationLevel::Serializable, None).await?;
//! conn.create_command("UPDATE users SET active = 1")?
//!     .execute_non_query()
//!     .await?;
//! tx.commit().await?;
//!
//! conn.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod state;
pub mod transaction;

// Re-export commonly used types
pub use command::{Command, Reader};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use mssql_driver_pool::{ConnectionTargetKey, PoolRegistry, PoolStatus};
pub use state::{ConnectionState, StateChange};
pub use tds_session::{Credentials, ProtocolFactories, SqlValue, TdsVersion};
pub use transaction::{IsolationLevel, SavePoint, Transaction};
