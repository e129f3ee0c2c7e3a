//! Scripted in-memory protocol sessions.
//!
//! A [`MockFactory`] carries a statement script and a journal shared by every
//! session it creates. Sessions answer statements by exact text match and
//! fall back to "zero rows affected".

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tds_session::{
    Credentials, ProtocolSession, SessionError, SessionFactory, SessionTarget, SqlValue,
};

type Row = Vec<SqlValue>;

/// Scripted answer to a statement.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// One or more result sets of rows.
    ResultSets(Vec<Vec<Row>>),

    /// Rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// The server rejects the statement; the session stays usable.
    Error(String),

    /// The transport dies while the statement runs.
    Fault,
}

impl MockResponse {
    /// A single result set holding one value.
    pub fn scalar(value: SqlValue) -> Self {
        Self::ResultSets(vec![vec![vec![value]]])
    }

    /// A single result set.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self::ResultSets(vec![rows])
    }

    /// Create a rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

/// Something a mock session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Login completed.
    Connect,
    /// Transport torn down.
    Disconnect,
    /// Statement sent.
    Execute(String),
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Creation index of the session, starting at zero.
    pub session: u64,
    /// What happened.
    pub event: MockEvent,
}

#[derive(Default)]
struct Shared {
    responses: Mutex<HashMap<String, MockResponse>>,
    journal: Mutex<Vec<JournalEntry>>,
    created: AtomicU64,
    reject_logins: AtomicBool,
}

impl Shared {
    fn record(&self, session: u64, event: MockEvent) {
        self.journal.lock().push(JournalEntry { session, event });
    }
}

/// Creates [`MockSession`]s that share one script and one journal.
///
/// Cloning yields another handle to the same script and journal.
#[derive(Clone, Default)]
pub struct MockFactory {
    shared: Arc<Shared>,
}

impl MockFactory {
    /// A factory whose sessions answer every statement with zero rows affected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `response`.
    #[must_use]
    pub fn with_response(self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.shared.responses.lock().insert(sql.into(), response);
        self
    }

    /// Kill the transport whenever `sql` runs.
    #[must_use]
    pub fn fault_on(self, sql: impl Into<String>) -> Self {
        self.with_response(sql, MockResponse::Fault)
    }

    /// Make subsequent logins fail (or succeed again).
    pub fn reject_logins(&self, reject: bool) {
        self.shared.reject_logins.store(reject, Ordering::SeqCst);
    }

    /// Number of sessions created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst) as usize
    }

    /// Everything every session did, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.shared.journal.lock().clone()
    }

    /// Every statement sent by any session, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.shared
            .journal
            .lock()
            .iter()
            .filter_map(|entry| match &entry.event {
                MockEvent::Execute(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of journal entries matching `event`.
    #[must_use]
    pub fn count(&self, event: &MockEvent) -> usize {
        self.shared
            .journal
            .lock()
            .iter()
            .filter(|entry| &entry.event == event)
            .count()
    }
}

impl fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFactory")
            .field("created", &self.created())
            .finish_non_exhaustive()
    }
}

impl SessionFactory for MockFactory {
    fn create(&self, target: &SessionTarget) -> Box<dyn ProtocolSession> {
        let id = self.shared.created.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(session = id, host = %target.host, "mock session created");
        Box::new(MockSession {
            id,
            shared: Arc::clone(&self.shared),
            connected: false,
            broken: false,
            pending: VecDeque::new(),
            rows: VecDeque::new(),
            current: None,
        })
    }
}

/// In-memory session driven by its factory's script.
///
/// Keeps the default [`ProtocolSession::is_usable`], so a fault only counts
/// if whoever holds the session notices the fatal error.
pub struct MockSession {
    id: u64,
    shared: Arc<Shared>,
    connected: bool,
    broken: bool,
    pending: VecDeque<Vec<Row>>,
    rows: VecDeque<Row>,
    current: Option<Row>,
}

impl MockSession {
    fn check_alive(&self) -> Result<(), SessionError> {
        if self.broken {
            return Err(SessionError::Closed);
        }
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    fn reset_cursor(&mut self) {
        self.pending.clear();
        self.rows.clear();
        self.current = None;
    }
}

impl fmt::Debug for MockSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSession")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .field("broken", &self.broken)
            .finish()
    }
}

#[async_trait::async_trait]
impl ProtocolSession for MockSession {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), SessionError> {
        if self.broken {
            return Err(SessionError::Closed);
        }
        if self.shared.reject_logins.load(Ordering::SeqCst) {
            return Err(SessionError::Connect(format!(
                "login failed for {}",
                credentials.username().unwrap_or("integrated user")
            )));
        }
        self.connected = true;
        self.shared.record(self.id, MockEvent::Connect);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.connected = false;
        self.reset_cursor();
        self.shared.record(self.id, MockEvent::Disconnect);
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, SessionError> {
        self.check_alive()?;
        self.reset_cursor();
        self.shared.record(self.id, MockEvent::Execute(sql.to_owned()));

        let response = self
            .shared
            .responses
            .lock()
            .get(sql)
            .cloned()
            .unwrap_or(MockResponse::RowsAffected(0));

        match response {
            MockResponse::ResultSets(sets) => {
                self.pending = sets.into();
                if let Some(first) = self.pending.pop_front() {
                    self.rows = first.into();
                }
                Ok(0)
            }
            MockResponse::RowsAffected(count) => Ok(count),
            MockResponse::Error(message) => Err(SessionError::Execute(message)),
            MockResponse::Fault => {
                self.broken = true;
                self.connected = false;
                Err(SessionError::Closed)
            }
        }
    }

    async fn next_result(&mut self) -> Result<bool, SessionError> {
        self.check_alive()?;
        self.current = None;
        match self.pending.pop_front() {
            Some(rows) => {
                self.rows = rows.into();
                Ok(true)
            }
            None => {
                self.rows.clear();
                Ok(false)
            }
        }
    }

    async fn next_row(&mut self) -> Result<bool, SessionError> {
        self.check_alive()?;
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn column_values(&self) -> Vec<SqlValue> {
        self.current.clone().unwrap_or_default()
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.broken
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures::{credentials, session_target};

    #[tokio::test]
    async fn test_scripted_rows_and_journal() {
        let factory = MockFactory::new().with_response(
            "SELECT id FROM t",
            MockResponse::ResultSets(vec![
                vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
                vec![vec![SqlValue::Int(3)]],
            ]),
        );
        let mut session = factory.create(&session_target("db"));
        session.connect(&credentials()).await.unwrap();

        session.execute("SELECT id FROM t").await.unwrap();
        assert!(session.next_row().await.unwrap());
        assert_eq!(session.column_values(), vec![SqlValue::Int(1)]);
        assert!(session.next_row().await.unwrap());
        assert!(!session.next_row().await.unwrap());
        assert!(session.next_result().await.unwrap());
        assert!(session.next_row().await.unwrap());
        assert_eq!(session.column_values(), vec![SqlValue::Int(3)]);
        assert!(!session.next_result().await.unwrap());

        assert_eq!(factory.statements(), vec!["SELECT id FROM t"]);
        assert_eq!(factory.count(&MockEvent::Connect), 1);
    }

    #[tokio::test]
    async fn test_fault_breaks_session() {
        let factory = MockFactory::new().fault_on("KILL");
        let mut session = factory.create(&session_target("db"));
        session.connect(&credentials()).await.unwrap();

        assert!(session.execute("KILL").await.unwrap_err().is_fatal());
        assert!(!session.is_connected());
        assert!(matches!(
            session.execute("SELECT 1").await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let factory = MockFactory::new();
        factory.reject_logins(true);
        let mut session = factory.create(&session_target("db"));

        let err = session.connect(&credentials()).await.unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
        assert!(!session.is_connected());
        assert!(matches!(
            session.execute("SELECT 1").await,
            Err(SessionError::NotConnected)
        ));
    }
}
