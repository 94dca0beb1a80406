//! Two-tier TTL cache fronting the remote service.
//!
//! Reads check a fast in-memory tier first, then the durable persisted tier,
//! then fall back to the supplied fetch closure. The two tiers share keys but
//! carry independent TTLs; only the durable tier survives process restarts.

use crate::clock::{Clock, SystemClock};
use crate::storage::{KvStore, StorageError};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Namespace for durable-tier entries inside the shared store.
const DURABLE_PREFIX: &str = "cache/";

/// A cached payload and the time it was written. An entry is valid while
/// `now - written_at < ttl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    data: serde_json::Value,
    written_at: i64,
}

impl Envelope {
    fn is_fresh(&self, now: i64, ttl: Duration) -> bool {
        now.saturating_sub(self.written_at) < ttl.as_secs() as i64
    }
}

/// Build a cache key from a resource name and its filter parameters.
///
/// Filters serialize into the key so differently-filtered reads of the same
/// resource never alias, while `invalidate(resource)` still sweeps them all.
pub fn cache_key(resource: &str, filter: &[(&str, &str)]) -> String {
    if filter.is_empty() {
        return resource.to_string();
    }
    let query: Vec<String> = filter.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", resource, query.join("&"))
}

/// Two-tier TTL cache keyed by resource + filter.
pub struct SyncCache {
    fast: Mutex<HashMap<String, Envelope>>,
    durable: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl SyncCache {
    pub fn new(durable: Arc<dyn KvStore>) -> Self {
        Self::with_clock(durable, Arc::new(SystemClock))
    }

    pub fn with_clock(durable: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fast: Mutex::new(HashMap::new()),
            durable,
            clock,
        }
    }

    /// Read through the cache, falling back to `fetch` on a full miss.
    ///
    /// Tier walk: fast tier if `age < ttl_fast`; else durable tier if
    /// `age < ttl_durable`, refreshing the fast tier; else run `fetch` and
    /// populate both tiers.
    ///
    /// Concurrent calls with the same key during a miss are NOT deduplicated:
    /// each invokes `fetch` independently and populations are
    /// last-write-wins.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl_fast: Duration,
        ttl_durable: Duration,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let now = self.clock.now();

        if let Some(envelope) = self.fast_tier()?.get(key).cloned() {
            if envelope.is_fresh(now, ttl_fast) {
                debug!(key, "cache hit (fast tier)");
                return decode(envelope.data);
            }
        }

        if let Some(raw) = self.durable.get(&durable_key(key))? {
            // A corrupt persisted envelope is treated as a miss
            if let Ok(envelope) = serde_json::from_slice::<Envelope>(&raw) {
                if envelope.is_fresh(now, ttl_durable) {
                    debug!(key, "cache hit (durable tier)");
                    let refreshed = Envelope {
                        data: envelope.data.clone(),
                        written_at: now,
                    };
                    self.fast_tier()?.insert(key.to_string(), refreshed);
                    return decode(envelope.data);
                }
            }
        }

        debug!(key, "cache miss, fetching");
        let value = fetch().await?;
        self.store(key, &value)?;
        Ok(value)
    }

    /// Write a payload into both tiers with the current timestamp.
    pub fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let envelope = Envelope {
            data: serde_json::to_value(value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            written_at: self.clock.now(),
        };
        let raw = serde_json::to_vec(&envelope)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.durable.set(&durable_key(key), &raw)?;
        self.fast_tier()?.insert(key.to_string(), envelope);
        Ok(())
    }

    /// Remove every entry matching the exact key or carrying it as a prefix,
    /// in both tiers. The next read refetches.
    pub fn invalidate(&self, key_or_prefix: &str) -> Result<()> {
        debug!(prefix = key_or_prefix, "cache invalidate");
        self.fast_tier()?
            .retain(|k, _| !k.starts_with(key_or_prefix));
        self.durable.remove_prefix(&durable_key(key_or_prefix))?;
        Ok(())
    }

    fn fast_tier(&self) -> Result<MutexGuard<'_, HashMap<String, Envelope>>> {
        Ok(self
            .fast
            .lock()
            .map_err(|_| StorageError::LockPoisoned("cache fast tier".to_string()))?)
    }
}

fn durable_key(key: &str) -> String {
    format!("{}{}", DURABLE_PREFIX, key)
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(data)
        .map_err(|e| StorageError::Serialization(e.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn advance_to(&self, t: i64) {
            self.0.store(t, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    const FAST: Duration = Duration::from_secs(60);
    const DURABLE: Duration = Duration::from_secs(300);

    fn cache_with_clock() -> (SyncCache, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000)));
        let store = Arc::new(MemoryStore::new());
        let cache = SyncCache::with_clock(store.clone(), clock.clone());
        (cache, clock, store)
    }

    async fn read(cache: &SyncCache, key: &str, calls: &AtomicUsize) -> String {
        cache
            .get_or_fetch(key, FAST, DURABLE, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("payload".to_string())
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tier_walk_over_time() {
        let (cache, clock, _) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        // t0: full miss populates both tiers
        assert_eq!(read(&cache, "passwords", &calls).await, "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // t0+30: fast-tier hit
        clock.advance_to(1_030);
        read(&cache, "passwords", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // t0+90: fast tier stale, durable tier hit, fast tier refreshed
        clock.advance_to(1_090);
        read(&cache, "passwords", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // t0+120: served by the fast tier refreshed at t0+90
        clock.advance_to(1_120);
        read(&cache, "passwords", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // t0+400: both tiers stale, refetch
        clock.advance_to(1_400);
        read(&cache, "passwords", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_durable_tier_survives_fast_tier_loss() {
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000)));
        let store = Arc::new(MemoryStore::new());
        let calls = AtomicUsize::new(0);

        let cache = SyncCache::with_clock(store.clone(), clock.clone());
        read(&cache, "spaces", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // New cache over the same store simulates a process restart: the
        // fast tier is empty, the durable tier still serves.
        let cache = SyncCache::with_clock(store, clock);
        read(&cache, "spaces", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (cache, _, _) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        read(&cache, "passwords?space=1", &calls).await;
        read(&cache, "passwords?space=2", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Prefix invalidation sweeps every filter variant of the resource
        cache.invalidate("passwords").unwrap();
        read(&cache, "passwords?space=1", &calls).await;
        read(&cache, "passwords?space=2", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_invalidate_leaves_other_resources() {
        let (cache, _, _) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        read(&cache, "passwords", &calls).await;
        read(&cache, "bills", &calls).await;
        cache.invalidate("passwords").unwrap();

        read(&cache, "bills", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        read(&cache, "passwords", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_and_caches_nothing() {
        let (cache, _, _) = cache_with_clock();

        let result: Result<String> = cache
            .get_or_fetch("passwords", FAST, DURABLE, || async {
                Err(crate::LockspaceError::InvalidInput("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        // Next read still fetches
        let calls = AtomicUsize::new(0);
        read(&cache, "passwords", &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("passwords", &[]), "passwords");
        assert_eq!(
            cache_key("passwords", &[("space_id", "s1"), ("archived", "false")]),
            "passwords?space_id=s1&archived=false"
        );
    }
}
