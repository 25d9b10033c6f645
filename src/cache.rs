//! StateCache - short-lived cache of host reads
//!
//! Collapses bursts of identical reads within one logical operation. Entries
//! are keyed by `<canonical path>#<property>`, expire by TTL, and are dropped
//! by prefix whenever the bridge writes under that path.
//!
//! Writes made outside the bridge (someone at the DAW) are not tracked, which
//! is why the TTL stays short.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::path::{is_path_prefix, LivePath};

/// Default time-to-live for cached host reads
pub const DEFAULT_TTL: Duration = Duration::from_millis(500);

/// Time source for freshness checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// One cached read
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub written_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) < self.ttl
    }
}

/// Concurrent TTL cache with prefix invalidation
pub struct StateCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    ttl: RwLock<Duration>,
    /// Bumped by every invalidation
    generation: AtomicU64,
    /// Serializes invalidations against conditional sets
    gate: RwLock<()>,
}

impl StateCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl: RwLock::new(ttl),
            generation: AtomicU64::new(0),
            gate: RwLock::new(()),
        }
    }

    /// Cache key for a property under a path
    pub fn key(path: &LivePath, property: &str) -> String {
        format!("{}#{}", path, property)
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    /// Change the TTL for entries written from now on
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    /// Fresh value for `key`, if any. Stale entries are dropped on the way.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh_at(now) {
                trace!("cache hit: {}", key);
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_fresh_at(now));
        None
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|entry| entry.is_fresh_at(now))
            .unwrap_or(false)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let ttl = self.ttl();
        self.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            written_at: self.clock.now(),
            ttl,
        };
        self.entries.insert(key, entry);
    }

    /// Invalidation counter; capture it before a read-through fetch
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` only if nothing was invalidated since `generation`.
    ///
    /// A fetch that raced a write would otherwise put the pre-write value
    /// back into the cache.
    pub fn set_if_generation(&self, key: impl Into<String>, value: Value, generation: u64) -> bool {
        let _gate = self.gate.read();
        if self.generation() != generation {
            trace!("cache set skipped, invalidated during fetch");
            return false;
        }
        self.set(key, value);
        true
    }

    /// Drop `key_or_prefix` and everything under it. Returns the number removed.
    pub fn invalidate(&self, key_or_prefix: &str) -> usize {
        let _gate = self.gate.write();
        self.generation.fetch_add(1, Ordering::AcqRel);

        let before = self.entries.len();
        self.entries
            .retain(|key, _| !is_path_prefix(key_or_prefix, key));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!("cache invalidated {} entries under '{}'", removed, key_or_prefix);
        }
        removed
    }

    /// Remove expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        let _gate = self.gate.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathComponents;
    use serde_json::json;

    fn cache_with_clock(ttl_ms: u64) -> (StateCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = StateCache::with_clock(Duration::from_millis(ttl_ms), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_fresh_after_set() {
        let (cache, _clock) = cache_with_clock(500);
        cache.set("live_set#track_count", json!(4));
        assert!(cache.is_fresh("live_set#track_count"));
        assert_eq!(cache.get("live_set#track_count"), Some(json!(4)));
    }

    #[test]
    fn test_stale_after_ttl() {
        let (cache, clock) = cache_with_clock(500);
        cache.set("live_set#track_count", json!(4));

        clock.advance(Duration::from_millis(499));
        assert!(cache.is_fresh("live_set#track_count"));

        clock.advance(Duration::from_millis(1));
        assert!(!cache.is_fresh("live_set#track_count"));
        assert_eq!(cache.get("live_set#track_count"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_ignores_ttl() {
        let (cache, _clock) = cache_with_clock(60_000);
        cache.set("live_set tracks 0#name", json!("Bass"));
        assert_eq!(cache.invalidate("live_set tracks 0#name"), 1);
        assert!(!cache.is_fresh("live_set tracks 0#name"));
    }

    #[test]
    fn test_prefix_invalidation() {
        let (cache, _clock) = cache_with_clock(60_000);
        let clip = PathComponents::clip(1, 0).build().unwrap();
        cache.set(StateCache::key(&clip, "notes"), json!([]));
        cache.set(StateCache::key(&clip, "length"), json!(4.0));
        cache.set("live_set tracks 1#name", json!("Keys"));
        cache.set("live_set tracks 10#name", json!("Pad"));

        let track1 = PathComponents::track(1).build().unwrap();
        assert_eq!(cache.invalidate(track1.as_str()), 3);
        assert!(cache.is_fresh("live_set tracks 10#name"));
    }

    #[test]
    fn test_conditional_set_loses_to_invalidation() {
        let (cache, _clock) = cache_with_clock(60_000);
        let generation = cache.generation();

        // a write lands while the read is in flight
        cache.invalidate("live_set tracks 0");

        assert!(!cache.set_if_generation("live_set tracks 0#name", json!("old"), generation));
        assert!(!cache.is_fresh("live_set tracks 0#name"));

        let generation = cache.generation();
        assert!(cache.set_if_generation("live_set tracks 0#name", json!("new"), generation));
        assert_eq!(cache.get("live_set tracks 0#name"), Some(json!("new")));
    }

    #[test]
    fn test_purge_expired_keeps_fresh() {
        let (cache, clock) = cache_with_clock(100);
        cache.set("a", json!(1));
        clock.advance(Duration::from_millis(60));
        cache.set("b", json!(2));
        clock.advance(Duration::from_millis(60));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_fresh("b"));
    }

    #[test]
    fn test_concurrent_set_and_invalidate() {
        let cache = Arc::new(StateCache::new(Duration::from_secs(60)));
        let mut handles = Vec::new();

        for t in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("live_set tracks {} clip_slots {}#has_clip", t, i % 8);
                    cache.set(key, json!(true));
                    if i % 50 == 0 {
                        cache.invalidate(&format!("live_set tracks {}", t));
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 32);
    }
}
