//! Registry of pools keyed by connection target.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tds_session::{ProtocolFactories, SessionFactory, TdsVersion};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::key::ConnectionTargetKey;
use crate::pool::Pool;

/// Maps each [`ConnectionTargetKey`] to exactly one [`Pool`].
///
/// The registry is an ordinary value: whoever constructs connections owns
/// one and hands clones of it around. Pools are created lazily on first
/// request and live as long as the registry.
#[derive(Clone)]
pub struct PoolRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    factories: ProtocolFactories,
    pools: Mutex<HashMap<ConnectionTargetKey, Pool>>,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new(factories: ProtocolFactories) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                factories,
                pools: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the pool for `key`, creating it with `sizing` on first use.
    ///
    /// Lookup and insertion happen under one lock, so concurrent first
    /// callers for the same key all receive the same pool. An existing pool
    /// keeps the settings it was created with; a differing `sizing` is
    /// logged and ignored.
    pub fn get_pool(&self, key: &ConnectionTargetKey, sizing: &PoolConfig) -> Result<Pool, PoolError> {
        let mut pools = self.inner.pools.lock();
        if let Some(pool) = pools.get(key) {
            if pool.config() != sizing {
                tracing::warn!(
                    pool = %key,
                    requested = ?sizing,
                    existing = ?pool.config(),
                    "pool already exists with other settings, keeping them"
                );
            }
            return Ok(pool.clone());
        }

        let factory = self.inner.factories.select(key.version());
        let pool = Pool::new(key.clone(), sizing.clone(), factory)?;
        pools.insert(key.clone(), pool.clone());
        drop(pools);

        tracing::info!(
            pool = %key,
            min = sizing.min_connections,
            max = sizing.max_connections,
            version = %key.version(),
            "created session pool"
        );
        Ok(pool)
    }

    /// Look up an existing pool without creating one.
    #[must_use]
    pub fn pool(&self, key: &ConnectionTargetKey) -> Option<Pool> {
        self.inner.pools.lock().get(key).cloned()
    }

    /// Session factory for unpooled, dedicated sessions.
    #[must_use]
    pub fn factory(&self, version: TdsVersion) -> Arc<dyn SessionFactory> {
        self.inner.factories.select(version)
    }

    /// Clear the pool for `key`. Returns false if no such pool exists.
    pub fn clear_pool(&self, key: &ConnectionTargetKey) -> bool {
        match self.pool(key) {
            Some(pool) => {
                pool.clear();
                true
            }
            None => false,
        }
    }

    /// Clear every pool.
    pub fn clear_all(&self) {
        let pools: Vec<Pool> = self.inner.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.clear();
        }
    }

    /// Number of pools created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pools.lock().len()
    }

    /// Check if no pool has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.len())
            .field("factories", &self.inner.factories)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::key::test_key as target_key;
    use std::time::Duration;
    use mssql_testing::MockFactory;

    fn registry() -> (PoolRegistry, MockFactory) {
        let factory = MockFactory::new();
        let registry = PoolRegistry::new(ProtocolFactories::new(Arc::new(factory.clone())));
        (registry, factory)
    }

    #[test]
    fn test_same_key_same_pool() {
        let (registry, _) = registry();
        let key = target_key("db", 0, 4);
        let sizing = PoolConfig::new().max_connections(4);

        let a = registry.get_pool(&key, &sizing).unwrap();
        let _held = a.acquire().unwrap();
        let b = registry.get_pool(&key, &sizing).unwrap();

        assert_eq!(b.status().in_use, 1, "second lookup must see the first pool");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_distinct_pools() {
        let (registry, _) = registry();
        let sizing = PoolConfig::new().max_connections(4);

        registry.get_pool(&target_key("one", 0, 4), &sizing).unwrap();
        registry.get_pool(&target_key("two", 0, 4), &sizing).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.pool(&target_key("three", 0, 4)).is_none());
    }

    #[test]
    fn test_existing_pool_keeps_its_settings() {
        let (registry, _) = registry();
        let key = target_key("db", 0, 4);
        let first = PoolConfig::new().max_connections(4);

        registry.get_pool(&key, &first).unwrap();
        let again = registry
            .get_pool(&key, &first.clone().max_lifetime(Some(Duration::from_secs(30))))
            .unwrap();
        assert_eq!(again.config(), &first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_sizing_creates_nothing() {
        let (registry, _) = registry();
        let result = registry.get_pool(&target_key("db", 0, 0), &PoolConfig::new().max_connections(0));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_pool_and_clear_all() {
        let (registry, _) = registry();
        let sizing = PoolConfig::new().min_connections(2).max_connections(4);
        let key = target_key("db", 2, 4);

        assert!(!registry.clear_pool(&key));

        let pool = registry.get_pool(&key, &sizing).unwrap();
        drop(pool.acquire().unwrap());
        assert_eq!(pool.status().available, 2);

        assert!(registry.clear_pool(&key));
        assert_eq!(pool.status().total, 0);

        drop(pool.acquire().unwrap());
        registry.clear_all();
        assert_eq!(pool.status().total, 0);
    }
}
