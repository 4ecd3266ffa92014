//! # Stage: Result Cache
//!
//! ## Responsibility
//! Keeps successful [`StrategyResult`]s keyed by a SHA-1 fingerprint of the
//! request, with a per-entry TTL and a hard capacity.
//!
//! ## Guarantees
//! - Thread-safe: one mutex guards lookup, insert and eviction
//! - Bounded: overflow evicts the oldest entries by insertion time (not LRU)
//! - Stale reads are explicit: [`ResultCache::get`] honours the TTL,
//!   [`ResultCache::get_stale`] ignores it
//!
//! ## NOT Responsible For
//! - Deciding when a cached result may be served (runtime / fallback manager)

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::time::Instant;

use crate::strategy::{StrategyContext, StrategyResult};

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Which parts of a context take part in its cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope<'a> {
    /// Per strategy: name and version prefix the context fields.
    Strategy { name: &'a str, version: &'a str },
    /// Per request: the user id joins the context fields.
    Request,
}

/// Deterministic SHA-1 hex key for `context`.
///
/// Returns `None` when the payload cannot be serialized; callers then skip
/// caching for that request.
pub fn cache_key<I: Serialize>(scope: KeyScope<'_>, context: &StrategyContext<I>) -> Option<String> {
    let payload = serde_json::to_vec(&context.payload).ok()?;
    let metadata = serde_json::to_vec(&context.metadata).ok()?;

    let mut hasher = Sha1::new();
    match scope {
        KeyScope::Strategy { name, version } => {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(version.as_bytes());
            hasher.update([0u8]);
        }
        KeyScope::Request => {
            hasher.update(context.user_id.as_deref().unwrap_or("").as_bytes());
            hasher.update([0u8]);
        }
    }
    hasher.update(&payload);
    hasher.update([0u8]);
    hasher.update(context.kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(&metadata);
    Some(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

struct CacheEntry<T> {
    result: StrategyResult<T>,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    fn is_fresh(&self) -> bool {
        self.age() <= self.ttl
    }
}

/// TTL + capacity bounded map from request key to result.
pub struct ResultCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    default_ttl: Duration,
    capacity: usize,
    evict_batch: usize,
}

impl<T: Clone> ResultCache<T> {
    /// `evict_batch` is how many of the oldest entries go when the cache
    /// overflows (at least enough to get back under `capacity`).
    pub fn new(default_ttl: Duration, capacity: usize, evict_batch: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            capacity: capacity.max(1),
            evict_batch: evict_batch.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh entry for `key`, marked `cache_hit`.
    pub fn get(&self, key: &str) -> Option<StrategyResult<T>> {
        let entries = self.lock();
        let entry = entries.get(key).filter(|e| e.is_fresh())?;
        let mut result = entry.result.clone();
        result.cache_hit = true;
        Some(result)
    }

    /// Any entry for `key` regardless of TTL, with its age.
    pub fn get_stale(&self, key: &str) -> Option<(StrategyResult<T>, Duration)> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        let mut result = entry.result.clone();
        result.cache_hit = true;
        Some((result, entry.age()))
    }

    pub fn insert(&self, key: String, result: StrategyResult<T>) {
        self.insert_with_ttl(key, result, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: String, result: StrategyResult<T>, ttl: Duration) {
        let mut entries = self.lock();
        entries.insert(key.clone(), CacheEntry { result, stored_at: Instant::now(), ttl });
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            let n = self.evict_batch.max(excess).min(entries.len() - 1);
            // the entry just written never evicts itself
            let mut by_age: Vec<(Instant, String)> = entries
                .iter()
                .filter(|(k, _)| **k != key)
                .map(|(k, e)| (e.stored_at, k.clone()))
                .collect();
            by_age.sort();
            for (_, k) in by_age.into_iter().take(n) {
                entries.remove(&k);
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry past its TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh());
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
