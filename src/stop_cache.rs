// Short-lived cache of raw stop-monitoring responses, keyed by monitoring ref.
// Entries are only ever replaced by a newer response; nothing else evicts them.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: serde_json::Value,
    pub stored_at: Instant,
}

#[derive(Debug, Clone)]
pub struct StopCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopCacheStats {
    pub entries: usize,
    pub fresh_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

impl StopCache {
    pub fn new(ttl: Duration) -> Self {
        StopCache {
            entries: HashMap::new(),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.ttl
    }

    /// Returns a copy of the blob stored for `key` if it is younger than the TTL.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<serde_json::Value> {
        let fresh = self
            .entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.payload.clone());

        match fresh {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        fresh
    }

    pub fn put(&mut self, key: &str, payload: serde_json::Value, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CacheEntry { payload, stored_at: now },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn fresh_count(&self, now: Instant) -> usize {
        self.entries.values().filter(|e| self.is_fresh(e, now)).count()
    }

    pub fn stats(&self, now: Instant) -> StopCacheStats {
        StopCacheStats {
            entries: self.len(),
            fresh_entries: self.fresh_count(now),
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
