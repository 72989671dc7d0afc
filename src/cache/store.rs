//! Byte-budgeted LRU store. Entries are charged by a configurable size
//! function; eviction pops least-recently-used entries until the budget
//! holds. The store never expires entries on a clock — staleness is the SWR
//! engine's concern, and a `get` returns (and touches) stale entries too.

use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use super::entry::CachedEntry;

/// Sizing function charged per entry on insert.
pub type SizeOf = Box<dyn Fn(&CachedEntry) -> usize + Send + Sync>;

pub struct CacheConfig {
    pub max_bytes: usize,
    pub size_of: SizeOf,
}

impl CacheConfig {
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            size_of: Box::new(CachedEntry::byte_size),
        }
    }
}

struct StoreInner {
    map: LruCache<String, Costed>,
    used: usize,
}

struct Costed {
    entry: Arc<CachedEntry>,
    cost: usize,
}

/// The shared cache store. One lock guards the recency list and the byte
/// accounting together so they can never drift apart.
pub struct CacheStore {
    inner: Mutex<StoreInner>,
    max_bytes: usize,
    size_of: SizeOf,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        // Entry count is unbounded; the byte budget is the only limit.
        Self {
            inner: Mutex::new(StoreInner {
                map: LruCache::unbounded(),
                used: 0,
            }),
            max_bytes: config.max_bytes,
            size_of: config.size_of,
        }
    }

    /// Returns the entry and marks it most-recently-used — even when the
    /// caller will treat it as stale.
    pub fn get(&self, key: &str) -> Option<Arc<CachedEntry>> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.map.get(key).map(|s| Arc::clone(&s.entry))
    }

    /// Inserts or atomically replaces the entry under `key`, then evicts
    /// least-recently-used entries until the budget holds.
    pub fn set(&self, key: String, entry: CachedEntry) {
        let cost = (self.size_of)(&entry);
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if let Some(old) = inner.map.put(
            key,
            Costed {
                entry: Arc::new(entry),
                cost,
            },
        ) {
            inner.used = inner.used.saturating_sub(old.cost);
        }
        inner.used += cost;

        let mut evicted = 0usize;
        while inner.used > self.max_bytes {
            match inner.map.pop_lru() {
                Some((_, old)) => {
                    inner.used = inner.used.saturating_sub(old.cost);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(evicted, used = inner.used, "cache evicted LRU entries");
        }
    }

    /// Removes the entry, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.map.pop(key) {
            Some(old) => {
                inner.used = inner.used.saturating_sub(old.cost);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every entry, most-recently-used first. Used by the
    /// persistence sidecar; recency order is preserved so a `load` of the
    /// dump restores the same eviction order.
    pub fn dump(&self) -> Vec<(String, Arc<CachedEntry>)> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .map
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(&s.entry)))
            .collect()
    }

    /// Bulk-inserts entries. Entries arrive most-recently-used first (the
    /// `dump` order), so they are replayed in reverse to rebuild recency.
    pub fn load(&self, entries: Vec<(String, CachedEntry)>) {
        for (key, entry) in entries.into_iter().rev() {
            self.set(key, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").used
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::HeaderList;
    use bytes::Bytes;

    fn entry(size: usize) -> CachedEntry {
        CachedEntry::new(200, HeaderList::new(), Bytes::from(vec![0u8; size]))
    }

    fn store(max: usize) -> CacheStore {
        // Fixed-cost sizing keeps the arithmetic in tests obvious.
        CacheStore::new(CacheConfig {
            max_bytes: max,
            size_of: Box::new(|e| e.body.len()),
        })
    }

    #[test]
    fn test_set_get_delete() {
        let store = store(1024);
        store.set("a".into(), entry(10));
        assert!(store.get("a").is_some());
        assert_eq!(store.used_bytes(), 10);
        assert!(store.delete("a"));
        assert!(store.get("a").is_none());
        assert_eq!(store.used_bytes(), 0);
        assert!(!store.delete("a"));
    }

    #[test]
    fn test_replace_adjusts_accounting() {
        let store = store(1024);
        store.set("a".into(), entry(100));
        store.set("a".into(), entry(40));
        assert_eq!(store.len(), 1);
        assert_eq!(store.used_bytes(), 40);
    }

    #[test]
    fn test_eviction_prefers_least_recently_used() {
        let store = store(300);
        store.set("a".into(), entry(100));
        store.set("b".into(), entry(100));
        store.set("c".into(), entry(100));
        // Touch "a" so "b" is the LRU entry.
        assert!(store.get("a").is_some());
        store.set("d".into(), entry(100));

        assert!(store.get("b").is_none(), "LRU entry should be evicted");
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert!(store.get("d").is_some());
        assert!(store.used_bytes() <= 300);
    }

    #[test]
    fn test_get_touches_even_stale_entries() {
        // The store has no notion of staleness: every get refreshes recency.
        let store = store(200);
        store.set("old".into(), entry(100));
        store.set("new".into(), entry(100));
        assert!(store.get("old").is_some());
        store.set("newer".into(), entry(100));
        // "new" was the LRU after the touch of "old".
        assert!(store.get("new").is_none());
        assert!(store.get("old").is_some());
    }

    #[test]
    fn test_dump_load_roundtrip() {
        let cache_store = store(1024);
        cache_store.set("a".into(), entry(10));
        cache_store.set("b".into(), entry(20));

        let dumped = cache_store.dump();
        assert_eq!(dumped.len(), 2);

        let restored = store(1024);
        restored.load(
            dumped
                .into_iter()
                .map(|(k, e)| (k, (*e).clone()))
                .collect(),
        );
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.used_bytes(), 30);
        assert!(restored.get("a").is_some());
    }
}
