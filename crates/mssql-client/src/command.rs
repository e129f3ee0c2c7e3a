//! Commands and forward-only readers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tds_session::{ProtocolSession, SqlValue, drain};

use crate::connection::{SessionHandle, Shared, attached, run_statement};
use crate::error::{Error, Result};

/// A statement bound to a [`Connection`](crate::Connection).
///
/// Every execution first invalidates the connection's live [`Reader`], if
/// any: a connection streams one result at a time.
pub struct Command {
    shared: Arc<Shared>,
    text: String,
}

impl Command {
    pub(crate) fn new(shared: Arc<Shared>, text: String) -> Self {
        Self { shared, text }
    }

    /// Statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Execute and stream the results through a [`Reader`].
    pub async fn execute_reader(&self) -> Result<Reader> {
        let mut guard = self.shared.session.lock().await;
        let session = attached(&mut guard)?;
        self.shared.invalidate_reader(session).await?;

        tracing::debug!(sql = %self.text, "executing reader");
        session.execute(&self.text).await?;

        let live = Arc::new(AtomicBool::new(true));
        self.shared.status().reader = Some(Arc::clone(&live));
        Ok(Reader {
            shared: Arc::clone(&self.shared),
            live,
            row: Vec::new(),
        })
    }

    /// Execute and return the number of rows affected.
    pub async fn execute_non_query(&self) -> Result<u64> {
        let mut guard = self.shared.session.lock().await;
        let session = attached(&mut guard)?;
        self.shared.invalidate_reader(session).await?;

        tracing::debug!(sql = %self.text, "executing non-query");
        let affected = run_statement(session, &self.text).await?;
        tracing::trace!(rows_affected = affected, "non-query complete");
        Ok(affected)
    }

    /// Execute and return the first column of the first row.
    ///
    /// Returns `None` when the statement produced no rows. Everything else
    /// it produced is discarded.
    pub async fn execute_scalar(&self) -> Result<Option<SqlValue>> {
        let mut guard = self.shared.session.lock().await;
        let session = attached(&mut guard)?;
        self.shared.invalidate_reader(session).await?;

        tracing::debug!(sql = %self.text, "executing scalar");
        session.execute(&self.text).await?;
        let value = if session.next_row().await? {
            session.column_values().into_iter().next()
        } else {
            None
        };
        drain(session).await?;
        Ok(value)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// Forward-only cursor over the results of [`Command::execute_reader`].
///
/// A reader is invalidated when it is closed, when another statement runs
/// on its connection, or when the connection closes. After that every
/// access fails with [`Error::ReaderClosed`].
pub struct Reader {
    shared: Arc<Shared>,
    live: Arc<AtomicBool>,
    row: Vec<SqlValue>,
}

fn live_session<'g>(
    live: &AtomicBool,
    guard: &'g mut Option<SessionHandle>,
) -> Result<&'g mut dyn ProtocolSession> {
    if !live.load(Ordering::SeqCst) {
        return Err(Error::ReaderClosed);
    }
    attached(guard)
}

impl Reader {
    /// Advance to the next row of the current result set.
    pub async fn read(&mut self) -> Result<bool> {
        let mut guard = self.shared.session.lock().await;
        let session = live_session(&self.live, &mut guard)?;
        let more = session.next_row().await?;
        self.row = if more {
            session.column_values()
        } else {
            Vec::new()
        };
        Ok(more)
    }

    /// Advance to the next result set.
    pub async fn next_result(&mut self) -> Result<bool> {
        let mut guard = self.shared.session.lock().await;
        let session = live_session(&self.live, &mut guard)?;
        self.row.clear();
        Ok(session.next_result().await?)
    }

    /// Values of the current row.
    pub fn values(&self) -> Result<&[SqlValue]> {
        if self.is_closed() {
            return Err(Error::ReaderClosed);
        }
        Ok(&self.row)
    }

    /// Value of column `index` in the current row.
    pub fn get(&self, index: usize) -> Result<&SqlValue> {
        let values = self.values()?;
        values.get(index).ok_or(Error::ColumnOutOfRange {
            index,
            count: values.len(),
        })
    }

    /// Close the reader, discarding unread rows and result sets.
    ///
    /// Closing a closed reader does nothing.
    pub async fn close(&mut self) -> Result<()> {
        let mut guard = self.shared.session.lock().await;
        self.row.clear();
        if !self.live.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.status().reader = None;
        let session = attached(&mut guard)?;
        drain(session).await?;
        Ok(())
    }

    /// Check if the reader has been closed or invalidated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.live.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("closed", &self.is_closed())
            .field("columns", &self.row.len())
            .finish_non_exhaustive()
    }
}
