//! Fragment cache: TTL-expiring, entry-bounded, approximately LRU.
//!
//! Entries are keyed by a SHA-256 over the canonical JSON encoding of
//! `(tag, props)`, so property insertion order never changes the key.
//! The cache is shared by every request; all bookkeeping for one `get` or
//! `put` happens under a single lock.

use crate::props::{canonical_json, Properties};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Hex SHA-256 of the canonical `(tag, props)` encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(tag: &str, props: &Properties) -> Self {
        let stable = canonical_json(&json!({ "tag": tag, "props": Value::Object(props.clone()) }));
        let digest = Sha256::digest(stable.as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Zero disables the cache.
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(30_000),
            max_entries: 500,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }
}

/// A stored fragment. Never mutated; a newer `put` replaces it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub html: String,
    pub expires_at: Instant,
    pub size_bytes: usize,
}

/// Point-in-time view for health and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl: Duration,
}

#[derive(Debug)]
struct Slot {
    entry: Arc<CacheEntry>,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Slot>,
    /// Recency order: lowest tick is the eviction candidate.
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    bytes: usize,
}

impl CacheState {
    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(slot) = self.entries.remove(key) {
            self.order.remove(&slot.tick);
            self.bytes -= slot.entry.size_bytes;
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.remove(&entry.key);
        let tick = self.next_tick;
        self.next_tick += 1;
        self.bytes += entry.size_bytes;
        self.order.insert(tick, entry.key.clone());
        self.entries.insert(
            entry.key.clone(),
            Slot {
                entry: Arc::new(entry),
                tick,
            },
        );
    }

    fn evict_lru(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        if let Some(slot) = self.entries.remove(&key) {
            self.bytes -= slot.entry.size_bytes;
        }
        Some(key)
    }
}

pub struct FragmentCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FragmentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a fragment, purging it if expired and refreshing its recency
    /// otherwise.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        if !self.config.is_enabled() {
            return None;
        }
        let now = self.clock.now();
        let mut state = self.lock();

        let lookup = state
            .entries
            .get(key)
            .map(|slot| (now > slot.entry.expires_at, slot.entry.html.clone()));
        let html = match lookup {
            None => None,
            Some((true, _)) => {
                state.remove(key);
                tracing::trace!(key = key.as_str(), "cache entry expired");
                None
            }
            Some((false, html)) => Some(html),
        };

        match html {
            Some(html) => {
                state.touch(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(html)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a fragment, evicting least-recently-used entries over the bound.
    pub fn put(&self, key: CacheKey, html: String) {
        if !self.config.is_enabled() {
            return;
        }
        let entry = CacheEntry {
            key,
            size_bytes: html.len(),
            html,
            expires_at: self.clock.now() + self.config.ttl,
        };
        let mut state = self.lock();
        state.insert(entry);
        while state.entries.len() > self.config.max_entries {
            match state.evict_lru() {
                Some(evicted) => tracing::trace!(key = evicted.as_str(), "cache entry evicted"),
                None => break,
            }
        }
    }

    /// Snapshot of a stored entry, without touching recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl: self.config.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    fn key(tag: &str) -> CacheKey {
        CacheKey::new(tag, &Properties::new())
    }

    fn cache(ttl_ms: u64, max_entries: usize) -> (FragmentCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = FragmentCache::with_clock(
            CacheConfig {
                ttl: Duration::from_millis(ttl_ms),
                max_entries,
            },
            clock.clone(),
        );
        (cache, clock)
    }

    #[test]
    fn test_key_is_order_independent() {
        let mut a = Properties::new();
        a.insert("name".into(), json!("Ada"));
        a.insert("lang".into(), json!("en"));
        let mut b = Properties::new();
        b.insert("lang".into(), json!("en"));
        b.insert("name".into(), json!("Ada"));

        assert_eq!(CacheKey::new("x-y", &a), CacheKey::new("x-y", &b));
        assert_ne!(CacheKey::new("x-y", &a), CacheKey::new("x-z", &a));
        assert_eq!(CacheKey::new("x-y", &a).as_str().len(), 64);
    }

    #[test]
    fn test_hit_then_expiry() {
        let (cache, clock) = cache(1_000, 10);
        let k = CacheKey::new("ssr-hello-widget", &props(json!({"name": "Ada"})));
        cache.put(k.clone(), "<p>Hello</p>".into());

        assert_eq!(cache.get(&k).as_deref(), Some("<p>Hello</p>"));

        clock.advance(Duration::from_millis(1_001));
        assert_eq!(cache.get(&k), None);
        assert!(cache.is_empty(), "expired entry is purged on access");

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_entry_at_exact_ttl_is_still_valid() {
        let (cache, clock) = cache(500, 10);
        cache.put(key("a-b"), "x".into());
        clock.advance(Duration::from_millis(500));
        assert!(cache.get(&key("a-b")).is_some());
    }

    #[test]
    fn test_zero_ttl_disables() {
        let (cache, _) = cache(0, 10);
        cache.put(key("a-b"), "x".into());
        assert_eq!(cache.get(&key("a-b")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let (cache, _) = cache(60_000, 2);
        cache.put(key("a-a"), "a".into());
        cache.put(key("b-b"), "b".into());

        // Touch a-a so b-b becomes least recently used.
        assert!(cache.get(&key("a-a")).is_some());
        cache.put(key("c-c"), "c".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&key("a-a")).is_some());
        assert!(cache.peek(&key("b-b")).is_none());
        assert!(cache.peek(&key("c-c")).is_some());
    }

    #[test]
    fn test_bound_never_exceeded() {
        let (cache, _) = cache(60_000, 5);
        for i in 0..50 {
            cache.put(key(&format!("tag-{}", i)), "x".repeat(i));
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.stats().bytes, (45..50).sum::<usize>());
    }

    #[test]
    fn test_replace_updates_size() {
        let (cache, _) = cache(60_000, 5);
        cache.put(key("a-b"), "1234".into());
        cache.put(key("a-b"), "12".into());
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.bytes), (1, 2));
        assert_eq!(cache.peek(&key("a-b")).unwrap().size_bytes, 2);
    }

    #[test]
    fn test_concurrent_access_keeps_bound_and_byte_count() {
        let cache = FragmentCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 8,
        });

        std::thread::scope(|scope| {
            for worker in 0..8usize {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..200usize {
                        let k = key(&format!("tag-{}", (worker * 7 + i) % 24));
                        if cache.get(&k).is_none() {
                            cache.put(k, "x".repeat(1 + (worker + i) % 13));
                        }
                        assert!(cache.len() <= 8);
                    }
                });
            }
        });

        let live = {
            let state = cache.lock();
            assert_eq!(state.order.len(), state.entries.len());
            state
                .entries
                .values()
                .map(|slot| slot.entry.size_bytes)
                .sum::<usize>()
        };
        let stats = cache.stats();
        assert!(stats.entries <= 8);
        assert_eq!(stats.bytes, live);
        assert_eq!(stats.hits + stats.misses, 8 * 200);
    }
}
