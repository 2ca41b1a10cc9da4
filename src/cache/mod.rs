//! Bounded in-memory TTL cache with single-flight fetching
//!
//! Shared by the scanner and the scoring enrichment path to avoid redundant
//! external calls. The cache is an explicit object handed to its users by
//! reference; there is no process-wide cache state.
//!
//! The single-flight guarantee: N concurrent `get_or_fetch` calls for the
//! same key run exactly one underlying fetch, the rest await its result via
//! the per-key lock. A fetch failure propagates to the caller without
//! poisoning the slot for other keys.

use crate::errors::PipelineResult;
use crate::logger::{self, LogTag};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Cache metrics for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot<V> {
    value: Option<V>,
    inserted_at: Instant,
    expires_at: Instant,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        let now = Instant::now();
        Self {
            value: None,
            inserted_at: now,
            expires_at: now,
        }
    }

    fn fresh_value(&self) -> Option<&V> {
        match &self.value {
            Some(v) if Instant::now() < self.expires_at => Some(v),
            _ => None,
        }
    }
}

/// TTL cache, generic over the cached value type.
///
/// Two lock levels: a short-lived outer lock over the slot map, and a
/// per-key async mutex that serializes fetches for that key only. Callers
/// for different keys never contend beyond the brief map access.
pub struct TtlCache<V: Clone + Send + 'static> {
    name: &'static str,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot<V>>>>>,
    metrics: RwLock<CacheMetrics>,
    max_entries: usize,
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    pub fn new(name: &'static str, max_entries: usize) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Get the cached value for `key`, or run `fetch` to produce it.
    ///
    /// Expired entries are treated as misses and refetched in place.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> PipelineResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<V>>,
    {
        let slot = self.slot_for(key).await;

        // Per-key lock: the first caller fetches, concurrent callers for the
        // same key block here and then read the freshly stored value.
        let mut guard = slot.lock().await;
        if let Some(value) = guard.fresh_value() {
            self.metrics.write().hits += 1;
            return Ok(value.clone());
        }
        if guard.value.is_some() {
            self.metrics.write().expirations += 1;
        }
        self.metrics.write().misses += 1;

        let value = fetch().await?;
        let now = Instant::now();
        guard.value = Some(value.clone());
        guard.inserted_at = now;
        guard.expires_at = now + ttl;
        Ok(value)
    }

    /// Peek without fetching; expired entries read as absent
    pub async fn get(&self, key: &str) -> Option<V> {
        let slot = {
            let map = self.slots.lock().await;
            map.get(key).cloned()
        };
        let slot = slot?;
        let guard = slot.lock().await;
        let value = guard.fresh_value().cloned();
        if value.is_some() {
            self.metrics.write().hits += 1;
        } else {
            self.metrics.write().misses += 1;
        }
        value
    }

    /// Insert a value directly, bypassing the fetch path
    pub async fn put(&self, key: &str, value: V, ttl: Duration) {
        let slot = self.slot_for(key).await;
        let mut guard = slot.lock().await;
        let now = Instant::now();
        guard.value = Some(value);
        guard.inserted_at = now;
        guard.expires_at = now + ttl;
    }

    async fn slot_for(&self, key: &str) -> Arc<Mutex<Slot<V>>> {
        let mut map = self.slots.lock().await;
        if !map.contains_key(key) && map.len() >= self.max_entries {
            self.evict_one(&mut map);
        }
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::empty())))
            .clone()
    }

    /// Drop the oldest-inserted slot that is not currently being fetched
    fn evict_one(&self, map: &mut HashMap<String, Arc<Mutex<Slot<V>>>>) {
        let mut oldest: Option<(String, Instant)> = None;
        for (key, slot) in map.iter() {
            if let Ok(guard) = slot.try_lock() {
                let inserted = guard.inserted_at;
                match &oldest {
                    Some((_, ts)) if *ts <= inserted => {}
                    _ => oldest = Some((key.clone(), inserted)),
                }
            }
        }
        if let Some((key, _)) = oldest {
            map.remove(&key);
            self.metrics.write().evictions += 1;
        }
    }

    /// Remove expired entries; called from the periodic maintenance task
    pub async fn sweep(&self) {
        let mut removed = 0usize;
        let mut map = self.slots.lock().await;
        let keys: Vec<String> = map.keys().cloned().collect();
        for key in keys {
            let expired = match map.get(&key) {
                Some(slot) => match slot.try_lock() {
                    // Slots mid-fetch are skipped; the next sweep gets them
                    Ok(guard) => guard.value.is_some() && guard.fresh_value().is_none(),
                    Err(_) => false,
                },
                None => false,
            };
            if expired {
                map.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.metrics.write().expirations += removed as u64;
            logger::debug(
                LogTag::Cache,
                &format!("{}: swept {} expired entries", self.name, removed),
            );
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Arc<TtlCache<String>> {
        Arc::new(TtlCache::new("test", 64))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("hot-key", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the fetch open long enough for every caller to pile up
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("value".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_fetch("k", Duration::from_millis(10), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "v");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_error_does_not_poison_the_slot() {
        let cache = cache();

        let result = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Err::<String, _>(PipelineError::SourceUnavailable {
                    source: "stub".to_string(),
                    attempts: 3,
                    last_error: "boom".to_string(),
                })
            })
            .await;
        assert!(result.is_err());

        // The failed fetch left no value behind; a later fetch succeeds
        let value = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Ok("recovered".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "recovered");
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache: TtlCache<String> = TtlCache::new("bounded", 4);
        for i in 0..10 {
            cache
                .put(&format!("k{}", i), "v".to_string(), Duration::from_secs(60))
                .await;
        }
        assert!(cache.len().await <= 4);
        assert!(cache.metrics().evictions >= 6);
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let cache = cache();
        cache
            .put("short", "v".to_string(), Duration::from_millis(5))
            .await;
        cache
            .put("long", "v".to_string(), Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.sweep().await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("long").await.is_some());
    }
}
