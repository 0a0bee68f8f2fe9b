//! Bounded TTL cache for wallet analysis results.
//!
//! Caches `WalletReport` results keyed by lowercased wallet address to avoid
//! redundant provider fetches and re-analysis for recently scanned wallets.
//!
//! Every entry carries its own TTL. When the cache is full, inserting a new
//! key evicts the entry with the oldest creation time (ties go to the entry
//! inserted first), whether or not that entry has already expired. Expired
//! entries are never returned; they are dropped lazily on read or in bulk by
//! [`TtlCache::cleanup_expired`].
//!
//! All state sits behind a single mutex. `get` takes the same lock as `set`
//! because it mutates hit/miss counters and per-entry access metadata.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{AnalyzerError, Result};
use crate::report::WalletReport;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for entry expiry.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall-clock time via `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
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
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + offset
    }
}

// ---------------------------------------------------------------------------
// Entries and statistics
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    /// Monotonic insertion order, breaks `created_at` ties on eviction.
    seq: u64,
    access_count: u64,
    last_accessed_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Read-only view of an entry's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub age: Duration,
    pub ttl: Duration,
    pub access_count: u64,
    /// Time since the last hit, `None` if never read.
    pub idle: Option<Duration>,
    pub expired: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Snapshot of cache size and lifetime counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub default_ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// hits / (hits + misses), 0 before the first lookup.
    pub hit_ratio: f64,
    /// size / max_size
    pub utilization: f64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
    counters: Counters,
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

/// Thread-safe bounded cache with per-entry TTL. Clones share storage.
pub struct TtlCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    clock: Arc<dyn Clock>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            max_size: self.max_size,
            default_ttl: self.default_ttl,
        }
    }
}

impl<V> fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("max_size", &self.max_size)
            .field("default_ttl", &self.default_ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl<V> TtlCache<V> {
    /// Create a cache backed by the system clock.
    pub fn new(max_size: usize, default_ttl: Duration) -> Result<Self> {
        Self::with_clock(max_size, default_ttl, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source.
    pub fn with_clock(max_size: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if max_size == 0 {
            return Err(AnalyzerError::InvalidConfiguration(
                "cache max_size must be positive".into(),
            ));
        }
        validate_ttl(default_ttl)?;

        tracing::info!(
            max_size,
            ttl_seconds = default_ttl.as_secs(),
            "cache initialized"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::with_capacity(max_size.min(4096)),
                next_seq: 0,
                counters: Counters::default(),
            })),
            clock,
            max_size,
            default_ttl,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    /// Insert with an explicit TTL.
    ///
    /// An existing key is overwritten in place and its creation time refreshed.
    /// A new key arriving at a full cache first evicts the oldest entry by
    /// creation time.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<()> {
        validate_ttl(ttl)?;
        let key = key.into();
        let now = self.clock.now();
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            if let Some(evicted) = oldest_key(&state.entries) {
                state.entries.remove(&evicted);
                state.counters.evictions += 1;
                crate::metrics::record_cache_eviction();
                tracing::debug!(key = %evicted, "cache full, evicted oldest entry");
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: now,
                ttl,
                seq,
                access_count: 0,
                last_accessed_at: None,
            },
        );
        tracing::debug!(%key, ttl_seconds = ttl.as_secs(), "cache set");
        Ok(())
    }

    /// Remove a key regardless of expiry. Does not touch statistics.
    pub fn remove(&self, key: &str) -> Option<V> {
        let removed = self.lock().entries.remove(key).map(|e| e.value);
        if removed.is_some() {
            tracing::debug!(%key, "cache entry removed");
        }
        removed
    }

    /// Drop every entry whose TTL has elapsed. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.counters.expirations += removed as u64;
        drop(state);

        if removed > 0 {
            crate::metrics::record_cache_expirations(removed as u64);
            tracing::debug!(removed, "cleaned up expired cache entries");
        }
        removed
    }

    /// Drop all entries. Lifetime counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
        tracing::info!("cache cleared");
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Entry metadata without counting a hit or miss.
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let now = self.clock.now();
        let state = self.lock();
        state.entries.get(key).map(|entry| EntryInfo {
            age: now.saturating_duration_since(entry.created_at),
            ttl: entry.ttl,
            access_count: entry.access_count,
            idle: entry
                .last_accessed_at
                .map(|at| now.saturating_duration_since(at)),
            expired: entry.is_expired(now),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let c = state.counters;
        let lookups = c.hits + c.misses;
        let size = state.entries.len();
        CacheStats {
            size,
            max_size: self.max_size,
            default_ttl_seconds: self.default_ttl.as_secs(),
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            expirations: c.expirations,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64
            },
            utilization: size as f64 / self.max_size as f64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // No operation panics between mutations, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> TtlCache<V> {
    /// Look up a live entry. Absent and expired keys both count as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let CacheState {
            entries, counters, ..
        } = &mut *guard;

        let outcome = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                entry.last_accessed_at = Some(now);
                counters.hits += 1;
                Lookup::Hit(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                counters.misses += 1;
                counters.expirations += 1;
                Lookup::Expired
            }
            None => {
                counters.misses += 1;
                Lookup::Miss
            }
        };
        drop(guard);

        match outcome {
            Lookup::Hit(value) => {
                crate::metrics::record_cache_hit();
                tracing::debug!(%key, "cache hit");
                Some(value)
            }
            Lookup::Expired => {
                crate::metrics::record_cache_miss();
                crate::metrics::record_cache_expirations(1);
                tracing::debug!(%key, "cache entry expired");
                None
            }
            Lookup::Miss => {
                crate::metrics::record_cache_miss();
                tracing::debug!(%key, "cache miss");
                None
            }
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Miss,
}

/// Cache of finished wallet reports.
pub type WalletCache = TtlCache<Arc<WalletReport>>;

impl WalletCache {
    /// Build a cache key from a wallet address.
    pub fn key(wallet_address: &str) -> String {
        wallet_address.trim().to_lowercase()
    }
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(AnalyzerError::InvalidConfiguration(
            "cache ttl must be positive".into(),
        ));
    }
    Ok(())
}

fn oldest_key<V>(entries: &HashMap<String, CacheEntry<V>>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, entry)| (entry.created_at, entry.seq))
        .map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl_secs: u64) -> (TtlCache<String>, ManualClock) {
        let clock = ManualClock::new();
        let cache = TtlCache::with_clock(
            max_size,
            Duration::from_secs(ttl_secs),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (cache, clock)
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _) = cache(10, 60);
        cache.set("key1", "value1".to_string()).unwrap();
        assert_eq!(cache.get("key1").as_deref(), Some("value1"));
    }

    #[test]
    fn test_get_missing_is_none() {
        let (cache, _) = cache(10, 60);
        assert_eq!(cache.get("nonexistent"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expired_entry_is_absent_without_sweep() {
        let (cache, clock) = cache(10, 60);
        cache.set("key1", "value1".to_string()).unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(cache.get("key1").is_some(), "ttl boundary is exclusive");

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("key1"), None);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_custom_ttl_overrides_default() {
        let (cache, clock) = cache(10, 60);
        cache
            .set_with_ttl("short", "a".to_string(), Duration::from_secs(5))
            .unwrap();
        cache.set("long", "b".to_string()).unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long").as_deref(), Some("b"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let (cache, _) = cache(10, 60);
        let err = cache
            .set_with_ttl("k", "v".to_string(), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidConfiguration(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_construction() {
        assert!(TtlCache::<u32>::new(0, Duration::from_secs(1)).is_err());
        assert!(TtlCache::<u32>::new(1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_full_cache_evicts_oldest_by_creation() {
        let (cache, clock) = cache(3, 3600);
        cache.set("key1", "v1".to_string()).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("key2", "v2".to_string()).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("key3", "v3".to_string()).unwrap();

        // Reading key1 does not protect it; eviction is by creation time.
        assert!(cache.get("key1").is_some());

        clock.advance(Duration::from_secs(1));
        cache.set("key4", "v4".to_string()).unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("key1"), None);
        assert!(cache.get("key2").is_some());
        assert!(cache.get("key4").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_tie_goes_to_first_inserted() {
        // Clock never advances, so all entries share created_at.
        let (cache, _) = cache(2, 3600);
        cache.set("first", "a".to_string()).unwrap();
        cache.set("second", "b".to_string()).unwrap();
        cache.set("third", "c".to_string()).unwrap();

        assert!(cache.entry_info("first").is_none());
        assert!(cache.entry_info("second").is_some());
        assert!(cache.entry_info("third").is_some());
    }

    #[test]
    fn test_overwrite_refreshes_and_does_not_evict() {
        let (cache, clock) = cache(2, 3600);
        cache.set("a", "1".to_string()).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("b", "2".to_string()).unwrap();
        clock.advance(Duration::from_secs(1));

        cache.set("a", "updated".to_string()).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.entry_info("a").unwrap().age, Duration::ZERO);

        // "b" is now the oldest.
        cache.set("c", "3".to_string()).unwrap();
        assert!(cache.entry_info("b").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("updated"));
    }

    #[test]
    fn test_capacity_pressure_evicts_even_when_expired_entries_are_newer() {
        let (cache, clock) = cache(2, 3600);
        cache.set("old_live", "a".to_string()).unwrap();
        clock.advance(Duration::from_secs(1));
        cache
            .set_with_ttl("new_short", "b".to_string(), Duration::from_secs(1))
            .unwrap();
        clock.advance(Duration::from_secs(5));

        cache.set("c", "c".to_string()).unwrap();
        assert!(cache.entry_info("old_live").is_none());
        assert!(cache.entry_info("new_short").unwrap().expired);
    }

    #[test]
    fn test_cleanup_expired_counts_removed() {
        let (cache, clock) = cache(10, 60);
        cache.set("a", "1".to_string()).unwrap();
        cache.set("b", "2".to_string()).unwrap();
        cache
            .set_with_ttl("c", "3".to_string(), Duration::from_secs(600))
            .unwrap();

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 2);
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn test_hit_ratio() {
        let (cache, _) = cache(10, 60);
        assert_eq!(cache.stats().hit_ratio, 0.0);

        cache.set("a", "1".to_string()).unwrap();
        cache.get("a");
        cache.get("a");
        cache.get("a");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.75);
    }

    #[test]
    fn test_clear_keeps_counters() {
        let (cache, _) = cache(10, 60);
        cache.set("a", "1".to_string()).unwrap();
        cache.get("a");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_remove() {
        let (cache, _) = cache(10, 60);
        cache.set("a", "1".to_string()).unwrap();
        assert_eq!(cache.remove("a").as_deref(), Some("1"));
        assert_eq!(cache.remove("a"), None);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_entry_info_tracks_access() {
        let (cache, clock) = cache(10, 60);
        cache.set("a", "1".to_string()).unwrap();
        assert_eq!(cache.entry_info("a").unwrap().idle, None);

        cache.get("a");
        clock.advance(Duration::from_secs(3));
        let info = cache.entry_info("a").unwrap();
        assert_eq!(info.access_count, 1);
        assert_eq!(info.idle, Some(Duration::from_secs(3)));
        assert_eq!(info.age, Duration::from_secs(3));
        // entry_info is not a lookup
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_utilization() {
        let (cache, _) = cache(4, 60);
        cache.set("a", "1".to_string()).unwrap();
        assert_eq!(cache.stats().utilization, 0.25);
    }

    #[test]
    fn test_concurrent_access_never_exceeds_capacity() {
        let (cache, _) = cache(16, 60);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", (t * 200 + i) % 64);
                        cache.set(key.clone(), key.clone()).unwrap();
                        cache.get(&key);
                        if i % 50 == 0 {
                            cache.cleanup_expired();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.size <= 16);
        assert_eq!(stats.hits + stats.misses, 8 * 200);
    }

    #[test]
    fn test_wallet_key_normalizes_case() {
        assert_eq!(
            WalletCache::key(" 0xABCdef0000000000000000000000000000000001 "),
            "0xabcdef0000000000000000000000000000000001"
        );
    }
}
