//! Protocol session traits and per-version factory selection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;

use crate::credentials::Credentials;
use crate::error::SessionError;
use crate::value::SqlValue;
use crate::version::TdsVersion;

/// Where a session connects to, as handed to a [`SessionFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTarget {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Named instance, if any.
    pub instance: Option<String>,
    /// Initial database.
    pub database: Option<String>,
    /// Application name reported at login.
    pub application_name: String,
    /// Negotiated packet size.
    pub packet_size: u16,
    /// Login timeout.
    pub connect_timeout: Duration,
    /// Requested protocol version.
    pub version: TdsVersion,
}

/// One authenticated, stateful session to the server.
///
/// A session is never shared: the pool hands it to exactly one connection
/// at a time. Implementations are free to block inside the async methods on
/// network I/O; callers never hold a pool lock while awaiting them.
#[async_trait::async_trait]
pub trait ProtocolSession: Send + fmt::Debug {
    /// Run the login handshake.
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), SessionError>;

    /// Tear down the transport.
    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Send a statement batch and position the cursor on its first result.
    ///
    /// Returns the affected row count reported by the server (zero when the
    /// statement produced rows instead).
    async fn execute(&mut self, sql: &str) -> Result<u64, SessionError>;

    /// Advance to the next result set of the current batch.
    async fn next_result(&mut self) -> Result<bool, SessionError>;

    /// Advance to the next row of the current result set.
    async fn next_row(&mut self) -> Result<bool, SessionError>;

    /// Values of the row the cursor is positioned on.
    fn column_values(&self) -> Vec<SqlValue>;

    /// Whether login has completed and the transport is up.
    fn is_connected(&self) -> bool;

    /// Whether the session can still be handed out.
    ///
    /// Returns false once a connection-level fault was observed.
    fn is_usable(&self) -> bool {
        true
    }
}

/// Consume every remaining row and result set on a session.
pub async fn drain(session: &mut dyn ProtocolSession) -> Result<(), SessionError> {
    loop {
        while session.next_row().await? {}
        if !session.next_result().await? {
            return Ok(());
        }
    }
}

/// Creates sessions for one protocol family.
///
/// Sessions come back not yet connected; login happens outside any pool
/// lock.
pub trait SessionFactory: Send + Sync {
    /// Create a new, disconnected session for `target`.
    fn create(&self, target: &SessionTarget) -> Box<dyn ProtocolSession>;
}

/// Session factories keyed by protocol version.
///
/// A pool asks for its factory once, when it is created, so every session
/// in a pool speaks the same protocol variant.
#[derive(Clone)]
pub struct ProtocolFactories {
    default: Arc<dyn SessionFactory>,
    by_version: HashMap<TdsVersion, Arc<dyn SessionFactory>>,
}

impl ProtocolFactories {
    /// Use `default` for every version without an override.
    pub fn new(default: Arc<dyn SessionFactory>) -> Self {
        Self {
            default,
            by_version: HashMap::new(),
        }
    }

    /// Register a factory for one protocol version.
    #[must_use]
    pub fn with_version(mut self, version: TdsVersion, factory: Arc<dyn SessionFactory>) -> Self {
        self.by_version.insert(version, factory);
        self
    }

    /// Pick the factory for `version`.
    #[must_use]
    pub fn select(&self, version: TdsVersion) -> Arc<dyn SessionFactory> {
        match self.by_version.get(&version) {
            Some(factory) => Arc::clone(factory),
            None => {
                tracing::trace!(%version, "no version-specific session factory, using default");
                Arc::clone(&self.default)
            }
        }
    }
}

impl fmt::Debug for ProtocolFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolFactories")
            .field("versions", &self.by_version.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Cursor {
        results: Vec<usize>,
        rows_left: usize,
        reads: usize,
    }

    #[async_trait::async_trait]
    impl ProtocolSession for Cursor {
        async fn connect(&mut self, _: &Credentials) -> Result<(), SessionError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
        async fn execute(&mut self, _: &str) -> Result<u64, SessionError> {
            Ok(0)
        }
        async fn next_result(&mut self) -> Result<bool, SessionError> {
            match self.results.pop() {
                Some(rows) => {
                    self.rows_left = rows;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
        async fn next_row(&mut self) -> Result<bool, SessionError> {
            if self.rows_left == 0 {
                return Ok(false);
            }
            self.rows_left -= 1;
            self.reads += 1;
            Ok(true)
        }
        fn column_values(&self) -> Vec<SqlValue> {
            Vec::new()
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    struct Named(&'static str);

    impl SessionFactory for Named {
        fn create(&self, _: &SessionTarget) -> Box<dyn ProtocolSession> {
            Box::new(Cursor {
                results: vec![self.0.len()],
                ..Cursor::default()
            })
        }
    }

    #[tokio::test]
    async fn test_drain_consumes_all_result_sets() {
        let mut cursor = Cursor {
            results: vec![2, 1],
            rows_left: 3,
            reads: 0,
        };
        drain(&mut cursor).await.unwrap();
        assert_eq!(cursor.reads, 6);
        assert!(cursor.results.is_empty());
        assert_eq!(cursor.rows_left, 0);
    }

    #[test]
    fn test_select_falls_back_to_default() {
        let default: Arc<dyn SessionFactory> = Arc::new(Named("default"));
        let strict: Arc<dyn SessionFactory> = Arc::new(Named("strict"));
        let factories = ProtocolFactories::new(Arc::clone(&default))
            .with_version(TdsVersion::V8_0, Arc::clone(&strict));

        assert!(Arc::ptr_eq(&factories.select(TdsVersion::V8_0), &strict));
        assert!(Arc::ptr_eq(&factories.select(TdsVersion::V7_4), &default));
    }
}
