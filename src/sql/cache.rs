//! Memoization of compiled statements.
//!
//! Compiled templates are shared process-wide and the cache grows without
//! bound by default: the set of distinct templates in a program is fixed by
//! its source. Callers that build templates dynamically can construct a
//! bounded (LRU) cache and inject it into their
//! [`Database`](crate::db::Database) handles. INSERT statements depend on the
//! provider's identifier quoting, so each handle owns its insert cache.
//!
//! A miss compiles outside the lock. Two threads missing on the same key both
//! compile and the later insert overwrites an equivalent value.

use crate::error::DbResult;
use crate::sql::insert::InsertSql;
use crate::sql::template::{AdaptedSql, compile};
use crate::sql::ParamStyle;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use tracing::debug;

/// Memoizing map from a cache key to an immutable compiled value.
pub struct TemplateCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Arc<V>>>,
}

impl<K: Hash + Eq, V> TemplateCache<K, V> {
    /// A cache that never evicts.
    pub fn unbounded() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    /// A cache that evicts the least recently used entry beyond `capacity`.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    // A panic while holding the lock cannot leave a half-written entry behind,
    // so a poisoned cache is still consistent.
    fn lock(&self) -> MutexGuard<'_, LruCache<K, Arc<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: Arc<V>) {
        self.lock().put(key, value);
    }

    /// Return the cached value for `key`, building and caching it on a miss.
    pub fn get_or_try_insert_with(
        &self,
        key: K,
        build: impl FnOnce() -> DbResult<V>,
    ) -> DbResult<Arc<V>> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = Arc::new(build()?);
        self.insert(key, Arc::clone(&value));
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<K: Hash + Eq, V> Default for TemplateCache<K, V> {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Compiled templates keyed by `(template, parameter style)`.
pub type StatementCache = TemplateCache<(String, ParamStyle), AdaptedSql>;

/// INSERT statements keyed by `(table, columns in caller order)`.
pub type InsertCache = TemplateCache<(String, Vec<String>), InsertSql>;

impl StatementCache {
    /// Compile `template` for `style`, memoized.
    pub fn adapt(&self, template: &str, style: ParamStyle) -> DbResult<Arc<AdaptedSql>> {
        self.get_or_try_insert_with((template.to_string(), style), || {
            debug!(template = %template, style = %style, "Compiling SQL template");
            compile(template, style)
        })
    }
}

static STATEMENT_CACHE: LazyLock<Arc<StatementCache>> =
    LazyLock::new(|| Arc::new(StatementCache::unbounded()));

/// The process-wide statement cache.
pub fn statement_cache() -> Arc<StatementCache> {
    Arc::clone(&STATEMENT_CACHE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    #[test]
    fn test_adapt_is_memoized() {
        let cache = StatementCache::unbounded();
        let first = cache.adapt("where id = $id", ParamStyle::Qmark).unwrap();
        let second = cache.adapt("where id = $id", ParamStyle::Qmark).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_style_is_part_of_key() {
        let cache = StatementCache::unbounded();
        let q = cache.adapt("where id = $id", ParamStyle::Qmark).unwrap();
        let n = cache.adapt("where id = $id", ParamStyle::Numeric).unwrap();
        assert_eq!(q.sql, "where id = ?");
        assert_eq!(n.sql, "where id = :1");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let cache = StatementCache::unbounded();
        let err = cache.adapt("where id = $", ParamStyle::Qmark).unwrap_err();
        assert!(matches!(err, DbError::Parse { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_cache_evicts_least_recent() {
        let cache = StatementCache::bounded(NonZeroUsize::new(2).unwrap());
        cache.adapt("select $a", ParamStyle::Qmark).unwrap();
        cache.adapt("select $b", ParamStyle::Qmark).unwrap();
        cache.adapt("select $a", ParamStyle::Qmark).unwrap();
        cache.adapt("select $c", ParamStyle::Qmark).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&("select $b".to_string(), ParamStyle::Qmark)).is_none());
        assert!(cache.get(&("select $a".to_string(), ParamStyle::Qmark)).is_some());
    }

    #[test]
    fn test_concurrent_population_is_consistent() {
        let cache = Arc::new(StatementCache::unbounded());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .adapt("where a = $a and b = $b", ParamStyle::Named)
                        .unwrap()
                        .sql
                        .clone()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "where a = :p1 and b = :p2");
        }
        assert_eq!(cache.len(), 1);
    }
}
