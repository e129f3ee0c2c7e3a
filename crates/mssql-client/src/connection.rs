//! Connection handles.
//!
//! A [`Connection`] owns at most one protocol session at a time. With
//! pooling on, the session is borrowed from the [`PoolRegistry`] pool for the
//! connection's target key and handed back on [`Connection::close`]; with
//! pooling off, a dedicated session is created on open and disconnected on
//! close.
//!
//! [`Transaction`]s, [`Command`]s and [`Reader`](crate::Reader)s share the
//! connection's state. All protocol I/O for one connection is serialized by
//! a single async lock, so a transaction statement and a reader fetch never
//! interleave on the wire.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mssql_driver_pool::{ConnectionTargetKey, PoolRegistry, PooledSession};
use parking_lot::{Mutex, MutexGuard};
use tds_session::{ProtocolSession, SessionError, drain};

use crate::command::Command;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::{ConnectionState, StateChange};
use crate::transaction::{IsolationLevel, Transaction};

type Listener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// The session a connection currently holds.
pub(crate) enum SessionHandle {
    Pooled(PooledSession),
    Dedicated(Box<dyn ProtocolSession>),
}

impl SessionHandle {
    pub(crate) fn session(&mut self) -> &mut dyn ProtocolSession {
        match self {
            Self::Pooled(session) => &mut **session,
            Self::Dedicated(session) => session.as_mut(),
        }
    }

    /// Give the session up. An unclean pooled session is evicted rather
    /// than parked.
    async fn finish(self, clean: bool) {
        match self {
            Self::Pooled(session) if clean => drop(session),
            Self::Pooled(session) => session.discard(),
            Self::Dedicated(mut session) => {
                if let Err(err) = session.disconnect().await {
                    tracing::warn!(error = %err, "dedicated session did not disconnect cleanly");
                }
            }
        }
    }
}

pub(crate) struct TransactionSlot {
    pub(crate) id: u64,
    pub(crate) open: Arc<AtomicBool>,
}

/// Connection state readable without awaiting the session lock.
pub(crate) struct Status {
    pub(crate) state: ConnectionState,
    pub(crate) database: Option<String>,
    pub(crate) transaction: Option<TransactionSlot>,
    pub(crate) reader: Option<Arc<AtomicBool>>,
    transactions_started: u64,
}

/// State shared by a connection and every object created from it.
///
/// Lock order: `session` first, then `status`. `status` is never held across
/// an `.await`.
pub(crate) struct Shared {
    config: Config,
    key: ConnectionTargetKey,
    registry: PoolRegistry,
    pub(crate) session: tokio::sync::Mutex<Option<SessionHandle>>,
    status: Mutex<Status>,
    listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    pub(crate) fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock()
    }

    /// Invalidate the live reader, if any, and drain what it left unread.
    pub(crate) async fn invalidate_reader(&self, session: &mut dyn ProtocolSession) -> Result<()> {
        let live = self.status().reader.take();
        if live.is_some_and(|live| live.swap(false, Ordering::SeqCst)) {
            tracing::trace!(server = %self.key, "invalidating live reader");
            drain(session).await?;
        }
        Ok(())
    }

    fn notify(&self, change: StateChange) {
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener(&change);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let Some(handle) = self.session.get_mut().take() else {
            return;
        };
        let status = self.status.get_mut();
        let dirty = status.transaction.is_some()
            || status.reader.is_some()
            || status.database != self.config.database;

        match handle {
            SessionHandle::Pooled(session) if dirty => {
                tracing::debug!(
                    server = %self.key,
                    session_id = session.id(),
                    "connection dropped with work in flight, evicting its session"
                );
                session.discard();
            }
            SessionHandle::Pooled(session) => drop(session),
            SessionHandle::Dedicated(session) => {
                tracing::debug!(server = %self.key, "connection dropped without close");
                drop(session);
            }
        }
    }
}

/// The session of an open connection, or [`Error::ConnectionClosed`].
pub(crate) fn attached(guard: &mut Option<SessionHandle>) -> Result<&mut dyn ProtocolSession> {
    guard
        .as_mut()
        .map(|handle| handle.session())
        .ok_or(Error::ConnectionClosed)
}

/// Execute `sql` and discard every result it produces.
pub(crate) async fn run_statement(
    session: &mut dyn ProtocolSession,
    sql: &str,
) -> std::result::Result<u64, SessionError> {
    let affected = session.execute(sql).await?;
    drain(session).await?;
    Ok(affected)
}

fn require_open<'g>(
    guard: &'g mut Option<SessionHandle>,
    operation: &'static str,
) -> Result<&'g mut dyn ProtocolSession> {
    guard
        .as_mut()
        .map(|handle| handle.session())
        .ok_or(Error::InvalidState {
            operation,
            state: ConnectionState::Closed,
        })
}

fn use_database(name: &str) -> String {
    format!("USE [{name}]")
}

/// A handle to one logical SQL Server connection.
///
/// # Example
///
/// ```rust,ignore
/// use mssql_client::{Connection, IsolationLevel};
///
/// let conn = Connection::from_connection_string(
///     "Server=localhost;Database=app;User Id=sa;Password=secret;Max Pool Size=10",
///     registry.clone(),
/// )?;
/// conn.open().await?;
///
/// let tx = conn.begin_transaction(IsolationLevel::ReadCommitted, None).await?;
/// conn.create_command("UPDATE accounts SET balance = 0")?
///     .execute_non_query()
///     .await?;
/// tx.commit().await?;
///
/// conn.close().await; // session goes back to the pool
/// ```
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a closed connection for `config`, drawing pooled sessions
    /// from `registry`.
    pub fn new(config: Config, registry: PoolRegistry) -> Result<Self> {
        config.validate()?;
        let key = config.target_key();
        let status = Status {
            state: ConnectionState::Closed,
            database: config.database.clone(),
            transaction: None,
            reader: None,
            transactions_started: 0,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                key,
                registry,
                session: tokio::sync::Mutex::new(None),
                status: Mutex::new(status),
                listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Parse `conn_str` and create a closed connection for it.
    pub fn from_connection_string(conn_str: &str, registry: PoolRegistry) -> Result<Self> {
        Self::new(Config::from_connection_string(conn_str)?, registry)
    }

    /// Attach a logged-in session.
    ///
    /// With pooling on, the session comes from the pool for this
    /// connection's target key; an exhausted pool fails with
    /// [`Error::PoolExhausted`] unless a pool timeout is configured. A
    /// session that fails to log in is evicted.
    pub async fn open(&self) -> Result<()> {
        let shared = &self.shared;
        let mut guard = shared.session.lock().await;
        if guard.is_some() {
            return Err(Error::InvalidState {
                operation: "open",
                state: ConnectionState::Open,
            });
        }

        let mut handle = self.checkout().await?;
        if !handle.session().is_connected() {
            let login = self.login(handle.session()).await;
            if let Err(err) = login {
                tracing::warn!(server = %shared.key, error = %err, "login failed");
                handle.finish(false).await;
                return Err(err);
            }
        }
        *guard = Some(handle);

        {
            let mut status = shared.status();
            status.state = ConnectionState::Open;
            status.database = shared.config.database.clone();
        }
        drop(guard);

        tracing::debug!(server = %shared.key, pooled = shared.config.pooling, "connection opened");
        shared.notify(StateChange::new(
            ConnectionState::Closed,
            ConnectionState::Open,
        ));
        Ok(())
    }

    async fn checkout(&self) -> Result<SessionHandle> {
        let shared = &self.shared;
        if !shared.config.pooling {
            tracing::debug!(server = %shared.key, "creating dedicated session");
            let factory = shared.registry.factory(shared.key.version());
            return Ok(SessionHandle::Dedicated(factory.create(shared.key.target())));
        }

        let pool = shared
            .registry
            .get_pool(&shared.key, shared.key.pool_config())?;
        Ok(SessionHandle::Pooled(pool.get().await?))
    }

    async fn login(&self, session: &mut dyn ProtocolSession) -> Result<()> {
        let config = &self.shared.config;
        tracing::debug!(
            server = %self.shared.key,
            auth = config.credentials.method_name(),
            "logging in"
        );
        if config.connect_timeout.is_zero() {
            return Ok(session.connect(&config.credentials).await?);
        }
        match tokio::time::timeout(config.connect_timeout, session.connect(&config.credentials))
            .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }

    /// Detach the session.
    ///
    /// A live reader is invalidated and drained, and an open transaction is
    /// rolled back, never committed. The session then goes back to its pool
    /// (or is disconnected when pooling is off). If any of that cleanup
    /// fails, the session is evicted instead of parked.
    ///
    /// Closing a closed connection does nothing.
    pub async fn close(&self) {
        let shared = &self.shared;
        let mut guard = shared.session.lock().await;
        let Some(mut handle) = guard.take() else {
            tracing::trace!(server = %shared.key, "connection already closed");
            return;
        };

        let (reader, transaction, database) = {
            let mut status = shared.status();
            (
                status.reader.take(),
                status.transaction.take(),
                status.database.clone(),
            )
        };
        let session = handle.session();
        // A faulted session gets no cleanup statements; it is evicted below.
        let mut clean = session.is_usable();
        if !clean {
            tracing::debug!(server = %shared.key, "session faulted, skipping cleanup");
        }

        let live_reader = reader.is_some_and(|live| live.swap(false, Ordering::SeqCst));
        if clean && live_reader {
            if let Err(err) = drain(session).await {
                tracing::warn!(server = %shared.key, error = %err, "failed to drain reader on close");
                clean = false;
            }
        }

        if let Some(transaction) = &transaction {
            transaction.open.store(false, Ordering::SeqCst);
        }
        if let Some(transaction) = transaction.filter(|_| clean) {
            tracing::debug!(
                server = %shared.key,
                transaction_id = transaction.id,
                "rolling back open transaction on close"
            );
            if let Err(err) = run_statement(session, "ROLLBACK TRANSACTION").await {
                tracing::warn!(server = %shared.key, error = %err, "implicit rollback failed");
                clean = false;
            }
        }

        // A pooled session must go back pointing at the database its key names.
        if clean && database != shared.config.database {
            match &shared.config.database {
                Some(original) => {
                    if let Err(err) = run_statement(session, &use_database(original)).await {
                        tracing::warn!(server = %shared.key, error = %err, "failed to restore database");
                        clean = false;
                    }
                }
                None => clean = false,
            }
        }

        handle.finish(clean).await;
        {
            let mut status = shared.status();
            status.state = ConnectionState::Closed;
            status.database = shared.config.database.clone();
        }
        drop(guard);

        tracing::debug!(server = %shared.key, evicted = !clean, "connection closed");
        shared.notify(StateChange::new(
            ConnectionState::Open,
            ConnectionState::Closed,
        ));
    }

    /// Begin a transaction.
    ///
    /// Fails with [`Error::ParallelTransaction`] while another transaction
    /// of this connection is open. Any live reader is invalidated first.
    pub async fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
        name: Option<&str>,
    ) -> Result<Transaction> {
        let name = name.filter(|name| !name.is_empty());
        if let Some(name) = name {
            validate_identifier(name)?;
        }

        let shared = &self.shared;
        let mut guard = shared.session.lock().await;
        let session = require_open(&mut guard, "begin a transaction")?;
        if shared.status().transaction.is_some() {
            return Err(Error::ParallelTransaction);
        }

        shared.invalidate_reader(session).await?;
        run_statement(session, isolation_level.as_sql()).await?;
        let begin = match name {
            Some(name) => format!("BEGIN TRANSACTION {name}"),
            None => "BEGIN TRANSACTION".to_string(),
        };
        run_statement(session, &begin).await?;

        let open = Arc::new(AtomicBool::new(true));
        let id = {
            let mut status = shared.status();
            status.transactions_started += 1;
            let id = status.transactions_started;
            status.transaction = Some(TransactionSlot {
                id,
                open: Arc::clone(&open),
            });
            id
        };
        tracing::debug!(
            server = %shared.key,
            transaction_id = id,
            isolation = isolation_level.name(),
            "transaction started"
        );

        Ok(Transaction::new(
            Arc::clone(shared),
            id,
            isolation_level,
            name.map(str::to_owned),
            open,
        ))
    }

    /// Create a command bound to this connection.
    pub fn create_command(&self, text: impl Into<String>) -> Result<Command> {
        let state = self.state();
        if !state.is_open() {
            return Err(Error::InvalidState {
                operation: "create a command",
                state,
            });
        }
        Ok(Command::new(Arc::clone(&self.shared), text.into()))
    }

    /// Switch the session to another database.
    ///
    /// The pooled session is switched back to the configured database when
    /// the connection closes.
    pub async fn change_database(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;

        let shared = &self.shared;
        let mut guard = shared.session.lock().await;
        let session = require_open(&mut guard, "change database")?;
        shared.invalidate_reader(session).await?;
        run_statement(session, &use_database(name)).await?;
        shared.status().database = Some(name.to_owned());

        tracing::debug!(server = %shared.key, database = name, "database changed");
        Ok(())
    }

    /// Register a listener for state transitions.
    ///
    /// Listeners run synchronously, in registration order, after the
    /// transition has taken effect.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.shared.listeners.lock().push(Arc::new(listener));
    }

    /// Clear the pool this connection draws from.
    ///
    /// Idle sessions are dropped; sessions in use, including this
    /// connection's, are evicted when they are returned. Returns false if
    /// the pool was never created.
    pub fn clear_pool(&self) -> bool {
        self.shared.registry.clear_pool(&self.shared.key)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.status().state
    }

    /// Check if the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Current database.
    #[must_use]
    pub fn database(&self) -> Option<String> {
        self.shared.status().database.clone()
    }

    /// Server this connection targets.
    #[must_use]
    pub fn data_source(&self) -> String {
        self.shared.config.data_source()
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> u16 {
        self.shared.config.packet_size
    }

    /// Login timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.shared.config.connect_timeout
    }

    /// Check if a transaction is open on this connection.
    #[must_use]
    pub fn has_transaction(&self) -> bool {
        self.shared.status().transaction.is_some()
    }

    /// The configuration this connection was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Normalized key of the pool this connection draws from.
    #[must_use]
    pub fn target_key(&self) -> &ConnectionTargetKey {
        &self.shared.key
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.shared.key.to_string())
            .field("state", &self.state())
            .field("pooling", &self.shared.config.pooling)
            .finish()
    }
}

/// Validate an identifier (savepoint name, database name, etc.) to prevent SQL injection.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    use once_cell::sync::Lazy;
    use regex::Regex;

    #[allow(clippy::expect_used)]
    static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_@#$]{0,127}$").expect("identifier pattern is valid")
    });

    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "identifier cannot be empty".into(),
        ));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{name}': must start with letter/underscore, \
             contain only alphanumerics/_/@/#/$, and be 1-128 characters"
        )));
    }

    Ok(())
}
