//! kpipe cache: a process-local TTL store and the copy-on-access wrapper
//! generators use for rendered document sets.
//!
//! Expiry is lazy: reads treat stale entries as missing without touching
//! them, and [`Cache::sync`] sweeps them out in one pass.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use kpipe_core::Document;
use metrics::{counter, gauge};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::debug;

/// TTL applied when the configured one is zero.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Key/value store contract shared by the TTL store and the document cache.
/// Implementations must be safe for concurrent readers and writers.
pub trait Cache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V);
    /// Drop every expired entry.
    fn sync(&self);
}

/// Time source; swapped for [`ManualClock`] in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant { Instant::now() }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self { Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) } }

    pub fn advance(&self, by: Duration) {
        let mut off = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *off += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self { Self::new() }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache settings. `ttl` of zero means [`DEFAULT_TTL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self { Self { ttl: DEFAULT_TTL } }
}

impl CacheConfig {
    /// Defaults overridden by `KPIPE_CACHE_TTL_SECS`.
    pub fn from_env() -> Self {
        let ttl = std::env::var("KPIPE_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);
        Self { ttl }
    }

    pub fn effective_ttl(&self) -> Duration {
        if self.ttl.is_zero() { DEFAULT_TTL } else { self.ttl }
    }
}

struct Entry<V> {
    value: V,
    /// `None` when `now + ttl` is past what `Instant` can represent: never expires.
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn live_at(&self, now: Instant) -> bool { self.expires_at.map_or(true, |t| t > now) }
}

/// Generic TTL store. Entries are replaced whole under the write lock, so
/// readers never observe a half-written or half-evicted entry.
pub struct TtlCache<V> {
    entries: RwLock<FxHashMap<String, Entry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self { Self::with_clock(config, Arc::new(SystemClock)) }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self { entries: RwLock::new(FxHashMap::default()), ttl: config.effective_ttl(), clock }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Number of stored entries, expired ones included until the next sync.
    pub fn len(&self) -> usize { self.entries.read().unwrap_or_else(PoisonError::into_inner).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn clear(&self) { self.entries.write().unwrap_or_else(PoisonError::into_inner).clear() }
}

impl<V: Clone + Send + Sync> Cache<V> for TtlCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match map.get(key) {
            Some(e) if e.live_at(now) => Some(e.value.clone()),
            _ => None,
        }
    }

    fn set(&self, key: &str, value: V) {
        let expires_at = self.clock.now().checked_add(self.ttl);
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), Entry { value, expires_at });
    }

    fn sync(&self) {
        let now = self.clock.now();
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, e| e.live_at(now));
        let evicted = before - map.len();
        gauge!("kpipe_cache_entries", map.len() as f64);
        if evicted > 0 {
            counter!("kpipe_cache_evictions_total", evicted as u64);
            debug!(evicted, remaining = map.len(), "cache sync");
        }
    }
}

/// Document-set cache with copy-on-get and copy-on-set.
///
/// Stored sets are shared internally behind an `Arc`; callers only ever
/// receive their own deep copy, and the cache keeps its own copy of what
/// it was given.
pub struct RenderCache {
    store: Box<dyn Cache<Arc<Vec<Document>>>>,
}

impl RenderCache {
    pub fn new(config: CacheConfig) -> Self { Self::with_store(TtlCache::new(config)) }

    pub fn with_store(store: impl Cache<Arc<Vec<Document>>> + 'static) -> Self { Self { store: Box::new(store) } }
}

impl Cache<Vec<Document>> for RenderCache {
    fn get(&self, key: &str) -> Option<Vec<Document>> {
        match self.store.get(key) {
            Some(shared) => {
                counter!("kpipe_cache_hits_total", 1u64);
                Some((*shared).clone())
            }
            None => {
                counter!("kpipe_cache_misses_total", 1u64);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Vec<Document>) {
        self.store.set(key, Arc::new(value));
    }

    fn sync(&self) { self.store.sync() }
}

impl RenderCache {
    /// Store a copy of a borrowed slice; the caller keeps ownership of `docs`.
    pub fn set_slice(&self, key: &str, docs: &[Document]) { self.store.set(key, Arc::new(docs.to_vec())) }
}

/// Deterministic cache key: 64-bit FNV-1a over the parts, hex encoded.
/// A separator byte keeps `["ab", "c"]` and `["a", "bc"]` apart.
pub fn cache_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    for part in parts {
        for b in part.as_ref() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h ^= 0xff;
        h = h.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", h)
}

/// Key for one generator invocation: identity plus the effective values.
/// Object keys serialize in sorted order, so equal values give equal keys.
pub fn render_key(identity: &str, values: Option<&Json>) -> String {
    let vals = values.map(|v| v.to_string()).unwrap_or_default();
    cache_key([identity, vals.as_str()])
}
