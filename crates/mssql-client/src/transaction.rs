//! Transaction support.
//!
//! This module provides transaction isolation levels, savepoint support,
//! and the [`Transaction`] handle returned by
//! [`Connection::begin_transaction`](crate::Connection::begin_transaction).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::{Shared, attached, run_statement, validate_identifier};
use crate::error::{Error, Result};

/// Transaction isolation level.
///
/// SQL Server supports these isolation levels for transaction management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,

    /// Read committed (default for SQL Server).
    ///
    /// Transactions can only read committed data. Prevents dirty reads
    /// but allows non-repeatable reads and phantom reads.
    #[default]
    ReadCommitted,

    /// Repeatable read.
    RepeatableRead,

    /// Serializable (highest isolation).
    Serializable,

    /// Snapshot isolation.
    ///
    /// Uses row versioning to provide a point-in-time view of data.
    /// Requires snapshot isolation to be enabled on the database.
    Snapshot,
}

impl IsolationLevel {
    /// Get the SQL statement to set this isolation level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            Self::Snapshot => "SET TRANSACTION ISOLATION LEVEL SNAPSHOT",
        }
    }

    /// Get the isolation level name as used in SQL Server.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// A savepoint within a transaction.
///
/// The savepoint name is validated when it is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePoint {
    name: String,
}

impl SavePoint {
    /// Get the savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An open transaction on a [`Connection`](crate::Connection).
///
/// A connection has at most one open transaction. The transaction ends with
/// [`commit`](Self::commit), a full [`rollback`](Self::rollback), or the
/// implicit rollback performed when its connection closes. Dropping an open
/// transaction does not end it.
///
/// # Example
///
/// ```rust,ignore
/// let tx = conn.begin_transaction(IsolationLevel::ReadCommitted, None).await?;
///
/// conn.create_command("INSERT INTO orders (customer_id) VALUES (42)")?
///     .execute_non_query()
///     .await?;
/// let sp = tx.save("before_items").await?;
///
/// conn.create_command("INSERT INTO items (order_id) VALUES (1)")?
///     .execute_non_query()
///     .await?;
///
/// // Undo the items but keep the order
/// tx.rollback_to(&sp).await?;
/// tx.commit().await?;
/// ```
pub struct Transaction {
    shared: Arc<Shared>,
    id: u64,
    isolation_level: IsolationLevel,
    name: Option<String>,
    open: Arc<AtomicBool>,
}

impl Transaction {
    pub(crate) fn new(
        shared: Arc<Shared>,
        id: u64,
        isolation_level: IsolationLevel,
        name: Option<String>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            id,
            isolation_level,
            name,
            open,
        }
    }

    /// Commit the transaction.
    pub async fn commit(&self) -> Result<()> {
        tracing::debug!(transaction_id = self.id, "committing transaction");
        self.run("COMMIT TRANSACTION", true).await
    }

    /// Roll back the transaction, or only to a savepoint.
    ///
    /// With a savepoint name, work done after that savepoint is undone and
    /// the transaction stays open. Without one, the whole transaction is
    /// rolled back and ends.
    pub async fn rollback(&self, savepoint: Option<&str>) -> Result<()> {
        match savepoint.filter(|name| !name.is_empty()) {
            Some(name) => {
                validate_identifier(name)?;
                tracing::debug!(transaction_id = self.id, savepoint = name, "rolling back to savepoint");
                self.run(&format!("ROLLBACK TRANSACTION {name}"), false)
                    .await
            }
            None => {
                tracing::debug!(transaction_id = self.id, "rolling back transaction");
                self.run("ROLLBACK TRANSACTION", true).await
            }
        }
    }

    /// Create a savepoint.
    pub async fn save(&self, name: &str) -> Result<SavePoint> {
        validate_identifier(name)?;
        tracing::debug!(transaction_id = self.id, name = name, "creating savepoint");
        self.run(&format!("SAVE TRANSACTION {name}"), false).await?;
        Ok(SavePoint {
            name: name.to_string(),
        })
    }

    /// Roll back to a savepoint created by [`save`](Self::save).
    pub async fn rollback_to(&self, savepoint: &SavePoint) -> Result<()> {
        self.rollback(Some(savepoint.name())).await
    }

    /// Check if the transaction is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Get the isolation level of this transaction.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Transaction name passed to `BEGIN TRANSACTION`, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn run(&self, sql: &str, ends_transaction: bool) -> Result<()> {
        let mut guard = self.shared.session.lock().await;
        if !self.is_open() {
            return Err(Error::TransactionNotOpen);
        }
        let session = attached(&mut guard)?;
        self.shared.invalidate_reader(session).await?;
        run_statement(session, sql).await?;

        if ends_transaction {
            self.open.store(false, Ordering::SeqCst);
            self.shared.status().transaction = None;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::debug!(
                transaction_id = self.id,
                "transaction handle dropped while open, it rolls back when the connection closes"
            );
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(
            IsolationLevel::ReadCommitted.as_sql(),
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
        assert_eq!(
            IsolationLevel::Snapshot.as_sql(),
            "SET TRANSACTION ISOLATION LEVEL SNAPSHOT"
        );
    }

    #[test]
    fn test_isolation_level_name() {
        assert_eq!(IsolationLevel::ReadCommitted.name(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.name(), "SERIALIZABLE");
    }

    #[test]
    fn test_default_isolation_level() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }
}
