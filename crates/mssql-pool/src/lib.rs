//! # mssql-driver-pool
//!
//! Bounded session pools for SQL Server, one pool per connection target.
//!
//! Logging in to SQL Server is expensive, so sessions are kept after use and
//! handed to the next caller that opens a connection against the same target.
//!
//! ## Features
//!
//! - Lazy warm-up to `min_connections` on first acquisition
//! - Hard cap at `max_connections`; exhaustion is reported immediately
//! - Optional bounded wait for a released session
//! - Faulted, stale (cleared), and over-age sessions are evicted on return;
//!   a session that ever reported a fatal error counts as faulted
//! - A [`PoolRegistry`] that creates exactly one pool per target key
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_driver_pool::PoolRegistry;
//!
//! let registry = PoolRegistry::new(factories);
//! let pool = registry.get_pool(&key, key.pool_config())?;
//!
//! let mut session = pool.get().await?;
//! session.connect(&credentials).await?;
//! // Use session...
//! // Session automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod pool;
pub mod registry;
mod tracked;

pub use config::PoolConfig;
pub use error::PoolError;
pub use key::ConnectionTargetKey;
pub use lifecycle::{SessionMetadata, SessionState};
pub use pool::{Pool, PoolStatus, PooledSession};
pub use registry::PoolRegistry;
