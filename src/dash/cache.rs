//! Time-limited cache of parsed workbooks.
//!
//! Entries are keyed by the path of the workbook, its modification time rounded to the minute
//! and the version of the dashboard: saving the workbook or upgrading the dashboard both
//! produce a new key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bumped when the parsed dataset changes shape.
pub const CACHE_VERSION: &str = "2026-01-05.dashboard.v4";

pub const DEFAULT_TTL_SECONDS: u64 = 3600;

#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct CacheKey {
    pub path: String,
    pub mtime_minute: i64,
    pub version: &'static str,
}

impl CacheKey {
    pub fn new(path: &str, mtime_minute: i64) -> CacheKey {
        CacheKey {
            path: path.to_string(),
            mtime_minute,
            version: CACHE_VERSION,
        }
    }
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct DatasetCache<V> {
    store: HashMap<CacheKey, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> DatasetCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: HashMap::new(),
            ttl,
        }
    }

    /// Returns None if the entry is missing or expired. Expired entries are dropped.
    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &CacheKey, now: Instant) -> Option<V> {
        let entry = self.store.get(key)?;
        if now.saturating_duration_since(entry.inserted_at) > self.ttl {
            self.store.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts or replaces an entry, and returns when it expires. Expired entries are dropped
    /// first: keys of older modification times are never read again.
    pub fn insert(&mut self, key: CacheKey, value: V) -> Instant {
        self.insert_at(key, value, Instant::now())
    }

    pub fn insert_at(&mut self, key: CacheKey, value: V, now: Instant) -> Instant {
        self.evict_expired(now);
        self.store.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
        now + self.ttl
    }

    pub fn expires_at(&self, key: &CacheKey) -> Option<Instant> {
        self.store.get(key).map(|e| e.inserted_at + self.ttl)
    }

    /// Drops every entry.
    pub fn invalidate(&mut self) {
        self.store.clear();
    }

    /// Removes the expired entries and returns how many were removed.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.store.len();
        let ttl = self.ttl;
        self.store
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) <= ttl);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire() {
        let mut c: DatasetCache<u32> = DatasetCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let k = CacheKey::new("stats.xlsx", 1_700_000_040);
        let expires = c.insert_at(k.clone(), 7, t0);
        assert_eq!(expires, t0 + Duration::from_secs(60));
        assert_eq!(c.expires_at(&k), Some(expires));
        assert_eq!(c.get_at(&k, t0 + Duration::from_secs(60)), Some(7));
        assert_eq!(c.get_at(&k, t0 + Duration::from_secs(61)), None);
        assert!(c.is_empty());
    }

    #[test]
    fn new_mtime_is_a_new_key() {
        let mut c: DatasetCache<u32> = DatasetCache::new(Duration::from_secs(60));
        c.insert(CacheKey::new("stats.xlsx", 60), 1);
        assert_eq!(c.get(&CacheKey::new("stats.xlsx", 120)), None);
        assert_eq!(c.get(&CacheKey::new("stats.xlsx", 60)), Some(1));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn saving_the_workbook_does_not_pile_up_entries() {
        let mut c: DatasetCache<u32> = DatasetCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        for i in 0..100u32 {
            let now = t0 + Duration::from_secs(60 * i as u64);
            c.insert_at(CacheKey::new("stats.xlsx", 60 * i as i64), i, now);
        }
        assert_eq!(c.len(), 1);
        let last = t0 + Duration::from_secs(60 * 99);
        assert_eq!(c.get_at(&CacheKey::new("stats.xlsx", 60 * 99), last), Some(99));
    }

    #[test]
    fn invalidate_and_evict() {
        let mut c: DatasetCache<&str> = DatasetCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        c.insert_at(CacheKey::new("a.xlsx", 0), "a", t0);
        c.insert_at(CacheKey::new("b.xlsx", 0), "b", t0 + Duration::from_secs(5));
        assert_eq!(c.evict_expired(t0 + Duration::from_secs(12)), 1);
        assert_eq!(c.len(), 1);
        c.invalidate();
        assert!(c.is_empty());
    }
}
