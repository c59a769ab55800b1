//! Memoized collection method results
//!
//! Results are stored type-erased under a key derived from the directory
//! type, the method name, its arguments, the collection scope and the
//! index state. Any index change produces different keys, so stale results
//! are never returned; the owning directory also clears the cache on every
//! write to bound its size.

use flexdb_core::{xxh3_hex, Result, Value};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

type Cached = Arc<dyn Any + Send + Sync>;

/// Inputs that identify one cached call
#[derive(Debug, Clone, Copy)]
pub struct CallSignature<'a> {
    /// Object type of the collection
    pub kind: &'a str,
    /// Method name
    pub method: &'a str,
    /// Call arguments
    pub args: &'a [Value],
    /// Fingerprint of the collection's key subset
    pub scope: &'a str,
    /// Fingerprint of the index state
    pub index_fingerprint: &'a str,
    /// Index revision counter
    pub index_revision: u64,
}

impl CallSignature<'_> {
    /// Stable cache key for this call
    pub fn cache_key(&self) -> String {
        let args = serde_json::to_string(self.args).unwrap_or_default();
        let material = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.kind, self.method, args, self.scope, self.index_fingerprint, self.index_revision
        );
        format!("{}.{}.{}", self.kind, self.method, xxh3_hex(material.as_bytes()))
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from the cache
    pub hits: u64,
    /// Calls that ran the computation
    pub misses: u64,
}

/// Type-erased memo table
#[derive(Default)]
pub struct MethodCache {
    entries: Mutex<HashMap<String, Cached>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for MethodCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodCache")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl MethodCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, computing and storing it on a miss
    ///
    /// The computation runs without holding the cache lock, so it may call
    /// other cached methods. Errors are returned and not cached.
    pub fn get_or_compute<T, F>(&self, key: String, compute: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        let cached = self.entries.lock().get(&key).cloned();
        if let Some(value) = cached.and_then(|v| v.downcast::<T>().ok()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(target: "flexdb::collection", key = %key, "Method cache hit");
            return Ok(T::clone(&value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute()?;
        self.entries.lock().insert(key, Arc::new(value.clone()));
        Ok(value)
    }

    /// Drop every cached result
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Hit/miss counters since creation
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexdb_core::Error;

    fn signature<'a>(args: &'a [Value], fingerprint: &'a str, revision: u64) -> CallSignature<'a> {
        CallSignature {
            kind: "accounts",
            method: "authorize",
            args,
            scope: "all",
            index_fingerprint: fingerprint,
            index_revision: revision,
        }
    }

    #[test]
    fn test_cache_key_covers_every_input() {
        let args = [Value::from("login"), Value::from("admin")];
        let base = signature(&args, "aaaa", 1).cache_key();
        assert!(base.starts_with("accounts.authorize."));
        assert_eq!(base, signature(&args, "aaaa", 1).cache_key());

        assert_ne!(base, signature(&args, "bbbb", 1).cache_key());
        assert_ne!(base, signature(&args, "aaaa", 2).cache_key());
        assert_ne!(base, signature(&args[..1], "aaaa", 1).cache_key());
    }

    #[test]
    fn test_get_or_compute_memoizes() {
        let cache = MethodCache::new();
        let mut runs = 0;
        let a: i64 = cache
            .get_or_compute("k".into(), || {
                runs += 1;
                Ok(42)
            })
            .unwrap();
        let b: i64 = cache.get_or_compute("k".into(), || Ok(0)).unwrap();
        assert_eq!((a, b, runs), (42, 42, 1));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = MethodCache::new();
        let err: Result<i64> = cache.get_or_compute("k".into(), || Err(Error::InvalidOperation("x".into())));
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_compute("k".into(), || Ok(7i64)).unwrap(), 7);
    }

    #[test]
    fn test_type_mismatch_recomputes() {
        let cache = MethodCache::new();
        cache.get_or_compute("k".into(), || Ok(1i64)).unwrap();
        let s: String = cache.get_or_compute("k".into(), || Ok("x".to_string())).unwrap();
        assert_eq!(s, "x");
    }

    #[test]
    fn test_clear() {
        let cache = MethodCache::new();
        cache.get_or_compute("k".into(), || Ok(Some(true))).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
