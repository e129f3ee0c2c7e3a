//! Fault tracking for pooled sessions.

use tds_session::{Credentials, ProtocolSession, SessionError, SqlValue};

/// A pooled session that remembers connection-level faults.
///
/// Every call passes through to the wrapped session. Once any call reports a
/// fatal [`SessionError`], the session stays unusable for good, whether or not
/// the wrapped implementation tracks that itself.
#[derive(Debug)]
pub(crate) struct TrackedSession {
    inner: Box<dyn ProtocolSession>,
    faulted: bool,
}

impl TrackedSession {
    pub(crate) fn new(inner: Box<dyn ProtocolSession>) -> Self {
        Self {
            inner,
            faulted: false,
        }
    }

    fn observe<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(err) = &result {
            if err.is_fatal() && !self.faulted {
                tracing::debug!(error = %err, "session faulted");
                self.faulted = true;
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl ProtocolSession for TrackedSession {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), SessionError> {
        let result = self.inner.connect(credentials).await;
        self.observe(result)
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        let result = self.inner.disconnect().await;
        self.observe(result)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, SessionError> {
        let result = self.inner.execute(sql).await;
        self.observe(result)
    }

    async fn next_result(&mut self) -> Result<bool, SessionError> {
        let result = self.inner.next_result().await;
        self.observe(result)
    }

    async fn next_row(&mut self) -> Result<bool, SessionError> {
        let result = self.inner.next_row().await;
        self.observe(result)
    }

    fn column_values(&self) -> Vec<SqlValue> {
        self.inner.column_values()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn is_usable(&self) -> bool {
        !self.faulted && self.inner.is_usable()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mssql_testing::{MockFactory, MockResponse, credentials, session_target};
    use tds_session::SessionFactory;

    fn tracked(factory: &MockFactory) -> TrackedSession {
        TrackedSession::new(factory.create(&session_target("db")))
    }

    #[tokio::test]
    async fn test_fatal_error_marks_session_unusable() {
        let factory = MockFactory::new().fault_on("KILL");
        let mut session = tracked(&factory);
        session.connect(&credentials()).await.unwrap();
        assert!(session.is_usable());

        assert!(session.execute("KILL").await.is_err());
        assert!(!session.is_usable());
    }

    #[tokio::test]
    async fn test_statement_error_keeps_session_usable() {
        let factory =
            MockFactory::new().with_response("SELEC 1", MockResponse::error("syntax error"));
        let mut session = tracked(&factory);
        session.connect(&credentials()).await.unwrap();

        assert!(session.execute("SELEC 1").await.is_err());
        assert!(session.is_usable());
        assert_eq!(session.execute("SELECT 1").await.unwrap(), 0);
    }
}
