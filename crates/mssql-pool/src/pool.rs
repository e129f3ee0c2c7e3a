//! Session pool implementation.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tds_session::{ProtocolSession, SessionFactory};
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::key::ConnectionTargetKey;
use crate::lifecycle::SessionMetadata;
use crate::tracked::TrackedSession;

/// A bounded pool of protocol sessions for one connection target.
///
/// The pool never performs I/O. It creates sessions through its factory
/// (disconnected), tracks which are checked out, and takes them back. All
/// bookkeeping happens under a single lock; logging in and running
/// statements happen on the caller's side, outside that lock.
///
/// Cloning a `Pool` is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    key: ConnectionTargetKey,
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    slots: Mutex<Slots>,
    released: Notify,
}

#[derive(Default)]
struct Slots {
    // Insertion order is creation order; idle scans walk it front to back.
    entries: Vec<Slot>,
    next_id: u64,
    generation: u64,
}

struct Slot {
    meta: SessionMetadata,
    generation: u64,
    // `Some` exactly while the slot is idle.
    session: Option<TrackedSession>,
}

impl Slots {
    fn create(&mut self, pool: &PoolInner) -> (u64, TrackedSession) {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(pool = %pool.key, session_id = id, "creating pooled session");
        (id, TrackedSession::new(pool.factory.create(pool.key.target())))
    }

    fn push_idle(&mut self, pool: &PoolInner) {
        let (id, session) = self.create(pool);
        self.entries.push(Slot {
            meta: SessionMetadata::new(id),
            generation: self.generation,
            session: Some(session),
        });
    }

    fn push_checked_out(&mut self, pool: &PoolInner) -> (u64, TrackedSession) {
        let (id, session) = self.create(pool);
        let mut meta = SessionMetadata::new(id);
        meta.mark_checkout();
        self.entries.push(Slot {
            meta,
            generation: self.generation,
            session: None,
        });
        (id, session)
    }
}

impl Pool {
    /// Create an empty pool. Sessions are created on first acquisition.
    pub fn new(
        key: ConnectionTargetKey,
        config: PoolConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                key,
                config,
                factory,
                slots: Mutex::new(Slots::default()),
                released: Notify::new(),
            }),
        })
    }

    /// Check out a session without waiting.
    ///
    /// Tops the pool up to `min_connections`, then returns the oldest idle
    /// session, or creates a new one if the pool is below
    /// `max_connections`. Fails with [`PoolError::Exhausted`] otherwise.
    pub fn acquire(&self) -> Result<PooledSession, PoolError> {
        let inner = &self.inner;
        let mut slots = inner.slots.lock();

        while slots.entries.len() < inner.config.warm_floor() as usize {
            slots.push_idle(inner);
        }

        let idle = slots.entries.iter_mut().find_map(|slot| {
            let session = slot.session.take()?;
            let idle_for = slot.meta.idle_for();
            slot.meta.mark_checkout();
            Some((slot.meta.id, session, idle_for))
        });
        let (id, session, idle_for) = match idle {
            Some(found) => found,
            None if slots.entries.len() < inner.config.max_connections as usize => {
                let (id, session) = slots.push_checked_out(inner);
                (id, session, None)
            }
            None => {
                tracing::debug!(
                    pool = %inner.key,
                    max = inner.config.max_connections,
                    "pool exhausted"
                );
                return Err(PoolError::Exhausted {
                    max: inner.config.max_connections,
                });
            }
        };
        drop(slots);

        tracing::trace!(pool = %inner.key, session_id = id, ?idle_for, "session checked out");
        Ok(PooledSession {
            pool: Arc::clone(inner),
            id,
            session: Some(session),
        })
    }

    /// Check out a session, waiting up to `timeout` for one to be released.
    ///
    /// A zero timeout behaves exactly like [`Pool::acquire`].
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledSession, PoolError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Registered before the attempt so a release in between is not missed.
            let released = self.inner.released.notified();
            match self.acquire() {
                Err(PoolError::Exhausted { .. }) if !timeout.is_zero() => {}
                other => return other,
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                tracing::debug!(pool = %self.inner.key, ?timeout, "timed out waiting for a session");
                return Err(PoolError::AcquisitionTimeout(timeout));
            }
        }
    }

    /// Check out a session, waiting up to the configured
    /// [`acquire_timeout`](PoolConfig::acquire_timeout) for one to be
    /// released.
    pub async fn get(&self) -> Result<PooledSession, PoolError> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Return a session to the pool.
    ///
    /// Equivalent to dropping it. Faulted sessions (including any that
    /// reported a fatal error while checked out), sessions that outlived
    /// `max_lifetime`, and sessions checked out before the last
    /// [`Pool::clear`] are evicted instead of parked.
    pub fn release(&self, session: PooledSession) {
        drop(session);
    }

    /// Drop every idle session and mark every checked-out one for eviction.
    pub fn clear(&self) {
        let mut slots = self.inner.slots.lock();
        slots.generation += 1;
        let before = slots.entries.len();
        let removed: Vec<_> = {
            let (idle, busy): (Vec<_>, Vec<_>) = std::mem::take(&mut slots.entries)
                .into_iter()
                .partition(|s| s.meta.state.is_available());
            slots.entries = busy;
            idle
        };
        drop(slots);

        tracing::info!(
            pool = %self.inner.key,
            dropped = removed.len(),
            outstanding = before - removed.len(),
            "pool cleared"
        );
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let slots = self.inner.slots.lock();
        let total = slots.entries.len() as u32;
        let available = slots
            .entries
            .iter()
            .filter(|s| s.meta.state.is_available())
            .count() as u32;
        PoolStatus {
            available,
            in_use: total - available,
            total,
            max: self.inner.config.max_connections,
        }
    }

    /// Metadata of every session slot, oldest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionMetadata> {
        self.inner
            .slots
            .lock()
            .entries
            .iter()
            .map(|s| s.meta.clone())
            .collect()
    }

    /// The target this pool serves.
    #[must_use]
    pub fn key(&self) -> &ConnectionTargetKey {
        &self.inner.key
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    fn check_in(&self, id: u64, session: TrackedSession) {
        let mut slots = self.slots.lock();
        let generation = slots.generation;
        let Some(index) = slots.entries.iter().position(|s| s.meta.id == id) else {
            return;
        };

        let slot = &mut slots.entries[index];
        let reason = if !session.is_usable() {
            Some("faulted")
        } else if slot.generation != generation {
            Some("pool cleared")
        } else if self
            .config
            .max_lifetime
            .is_some_and(|lifetime| slot.meta.is_expired(lifetime))
        {
            Some("lifetime exceeded")
        } else {
            None
        };

        match reason {
            None => {
                slot.meta.mark_checkin();
                slot.session = Some(session);
                drop(slots);
                tracing::trace!(pool = %self.key, session_id = id, "session returned");
            }
            Some(reason) => {
                slots.entries.remove(index);
                drop(slots);
                drop(session);
                tracing::debug!(pool = %self.key, session_id = id, reason, "session evicted");
            }
        }
        self.released.notify_one();
    }

    fn evict(&self, id: u64) {
        let mut slots = self.slots.lock();
        slots.entries.retain(|s| s.meta.id != id);
        drop(slots);
        tracing::debug!(pool = %self.key, session_id = id, reason = "discarded", "session evicted");
        self.released.notify_one();
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle sessions available.
    pub available: u32,
    /// Number of sessions currently checked out.
    pub in_use: u32,
    /// Total number of sessions.
    pub total: u32,
    /// Maximum allowed sessions.
    pub max: u32,
}

/// A session checked out of a [`Pool`].
///
/// Dereferences to the underlying [`ProtocolSession`]. When dropped, the
/// session goes back to its pool; use [`PooledSession::discard`] to evict it
/// instead.
pub struct PooledSession {
    pool: Arc<PoolInner>,
    id: u64,
    session: Option<TrackedSession>,
}

impl PooledSession {
    /// The session's identifier within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The target of the owning pool.
    #[must_use]
    pub fn key(&self) -> &ConnectionTargetKey {
        &self.pool.key
    }

    /// Remove the session from the pool for good.
    pub fn discard(mut self) {
        self.session = None;
        self.pool.evict(self.id);
    }
}

// `session` is only `None` after `discard` or during drop, both of which
// consume the handle.
#[allow(clippy::expect_used)]
impl Deref for PooledSession {
    type Target = dyn ProtocolSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().expect("pooled session already returned")
    }
}

#[allow(clippy::expect_used)]
impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_mut()
            .expect("pooled session already returned")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.check_in(self.id, session);
        }
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("pool", &self.pool.key)
            .field("id", &self.id)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::key::test_key as target_key;
    use mssql_testing::MockFactory;

    fn pool(min: u32, max: u32) -> (Pool, MockFactory) {
        let factory = MockFactory::new();
        let pool = Pool::new(
            target_key("db", min, max),
            PoolConfig::new().min_connections(min).max_connections(max),
            Arc::new(factory.clone()),
        )
        .unwrap();
        (pool, factory)
    }

    #[test]
    fn test_new_pool_is_empty_until_first_acquire() {
        let (pool, factory) = pool(3, 5);
        assert_eq!(pool.status().total, 0);
        assert_eq!(factory.created(), 0);

        let _s = pool.acquire().unwrap();
        let status = pool.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.in_use, 1);
        assert_eq!(status.available, 2);
    }

    #[test]
    fn test_release_and_reacquire_reuses_session() {
        let (pool, factory) = pool(1, 2);

        let a = pool.acquire().unwrap();
        let first = a.id();
        pool.release(a);

        let b = pool.acquire().unwrap();
        assert_eq!(b.id(), first, "idle session must be reused");
        assert_eq!(factory.created(), 1);
        assert_eq!(pool.status().total, 1);
    }

    #[test]
    fn test_exhaustion_is_immediate() {
        let (pool, factory) = pool(0, 1);

        let _a = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max: 1 }));
        assert_eq!(factory.created(), 1, "no second session may be created");
    }

    #[test]
    fn test_idle_scan_prefers_oldest_session() {
        let (pool, _) = pool(0, 3);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        let (ida, idb) = (a.id(), b.id());

        // Return newest first; the oldest must still win the next scan.
        drop(c);
        drop(b);
        drop(a);

        let next = pool.acquire().unwrap();
        assert_eq!(next.id(), ida);
        let after = pool.acquire().unwrap();
        assert_eq!(after.id(), idb);
    }

    #[tokio::test]
    async fn test_faulted_session_is_evicted() {
        let factory = MockFactory::new().fault_on("KILL");
        let pool = Pool::new(
            target_key("db", 1, 2),
            PoolConfig::new().min_connections(1).max_connections(2),
            Arc::new(factory),
        )
        .unwrap();

        let mut s = pool.acquire().unwrap();
        let id = s.id();
        s.connect(&mssql_testing::credentials()).await.unwrap();
        assert!(s.execute("KILL").await.unwrap_err().is_fatal());
        drop(s);

        assert_eq!(pool.status().total, 0, "faulted session must not be parked");

        let again = pool.acquire().unwrap();
        assert_ne!(again.id(), id);
        assert_eq!(pool.status().total, 1, "next acquire re-warms the pool");
    }

    #[test]
    fn test_sessions_report_idle_time() {
        let (pool, _) = pool(0, 2);
        let s = pool.acquire().unwrap();
        assert_eq!(pool.sessions()[0].idle_for(), None);

        drop(s);
        std::thread::sleep(Duration::from_millis(5));
        let sessions = pool.sessions();
        let meta = &sessions[0];
        assert_eq!(meta.checkout_count, 1);
        assert!(meta.idle_for().unwrap() >= Duration::from_millis(5));
        assert!(meta.last_used_at >= meta.created_at);
    }

    #[test]
    fn test_discard_removes_slot() {
        let (pool, _) = pool(0, 1);
        let s = pool.acquire().unwrap();
        s.discard();
        assert_eq!(pool.status().total, 0);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_clear_drops_idle_and_evicts_outstanding() {
        let (pool, _) = pool(2, 4);

        let busy = pool.acquire().unwrap();
        assert_eq!(pool.status().total, 2);

        pool.clear();
        assert_eq!(pool.status().total, 1);
        assert_eq!(pool.status().in_use, 1);

        drop(busy);
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_max_lifetime_evicts_on_return() {
        let factory = MockFactory::new();
        let pool = Pool::new(
            target_key("db", 0, 2),
            PoolConfig::new()
                .max_connections(2)
                .max_lifetime(Some(Duration::from_millis(1))),
            Arc::new(factory),
        )
        .unwrap();

        let s = pool.acquire().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        drop(s);
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Pool::new(
            target_key("db", 0, 0),
            PoolConfig::new().max_connections(0),
            Arc::new(MockFactory::new()),
        );
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_acquire_timeout_waits_for_release() {
        let (pool, _) = pool(0, 1);
        let held = pool.acquire().unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.id(), held_id);
    }

    #[tokio::test]
    async fn test_acquire_timeout_expires() {
        let (pool, _) = pool(0, 1);
        let _held = pool.acquire().unwrap();

        let err = pool
            .acquire_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::AcquisitionTimeout(_)));
    }

    #[tokio::test]
    async fn test_get_waits_for_configured_timeout() {
        let pool = Pool::new(
            target_key("db", 0, 1),
            PoolConfig::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_millis(20)),
            Arc::new(MockFactory::new()),
        )
        .unwrap();
        let held = pool.acquire().unwrap();

        let started = tokio::time::Instant::now();
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquisitionTimeout(t) if t == Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));

        drop(held);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_get_without_timeout_reports_exhaustion() {
        let (pool, _) = pool(0, 1);
        let _held = pool.acquire().unwrap();

        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max: 1 }));
    }

    #[tokio::test]
    async fn test_zero_timeout_reports_exhaustion() {
        let (pool, _) = pool(0, 1);
        let _held = pool.acquire().unwrap();

        let err = pool.acquire_timeout(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
    }
}
