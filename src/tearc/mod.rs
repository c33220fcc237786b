//! tearc — a Timed-Eviction-Adaptive-Replacement-Cache.
//!
//! A sharded caching structure whose goal is to keep as few high-security
//! objects (derived keys) in memory as possible. Items leave the cache
//! either when chosen by page replacement (ARC) or, at the latest, when
//! their eviction deadline is reached; every use of an item slides its
//! deadline forward.
//!
//! Sharding into independently locked buckets keeps contention low. Keys
//! are routed to a bucket by a general-purpose hash whose seed is chosen
//! at construction and stays fixed for the cache's lifetime.

mod bucket;
mod heap;

pub use bucket::BucketConfig;

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DvxError, Result};

/// Loads a missing value. Returns the value and how long it may stay
/// cached before the reaper evicts it.
pub type Loader<K, V, H> = dyn Fn(&K, &H) -> Result<(V, Duration)> + Send + Sync;

/// Informational callback invoked after an item has been evicted.
pub type EvictionHook<K> = dyn Fn(&K) + Send + Sync;

/// A sharded cache with adaptive replacement and timed eviction.
pub struct Cache<K, V, H>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    H: 'static,
{
    shards: u64,
    hasher: RandomState,
    buckets: Vec<bucket::Bucket<K, V, H>>,
}

impl<K, V, H> Cache<K, V, H>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    H: 'static,
{
    /// Build a cache of `size` total slots split over `shards` buckets.
    ///
    /// `size` must divide evenly into `shards`; all durations must be
    /// positive with `min_tick < max_tick`.
    pub fn new(
        size: usize,
        shards: usize,
        loader: Arc<Loader<K, V, H>>,
        evicted: Option<Arc<EvictionHook<K>>>,
        config: BucketConfig,
    ) -> Result<Self> {
        if size == 0 {
            return Err(DvxError::Config(
                "tearc: size must be greater than zero".into(),
            ));
        }
        if shards == 0 {
            return Err(DvxError::Config(
                "tearc: shards must be greater than zero".into(),
            ));
        }
        if size % shards != 0 {
            return Err(DvxError::Config(
                "tearc: size must be evenly dividable into shards".into(),
            ));
        }
        if config.min_tick.is_zero() || config.slide.is_zero() {
            return Err(DvxError::Config(
                "tearc: all durations must be positive".into(),
            ));
        }
        if config.min_tick >= config.max_tick {
            return Err(DvxError::Config(
                "tearc: min_tick must be less than max_tick".into(),
            ));
        }

        let evicted = evicted.unwrap_or_else(|| {
            let noop: Arc<EvictionHook<K>> = Arc::new(|_: &K| {});
            noop
        });

        let mut buckets = Vec::with_capacity(shards);
        for id in 0..shards {
            buckets.push(bucket::Bucket::new(
                id,
                size / shards,
                Arc::clone(&loader),
                Arc::clone(&evicted),
                config,
            )?);
        }

        Ok(Self {
            shards: shards as u64,
            hasher: RandomState::new(),
            buckets,
        })
    }

    fn jump(&self, key: &K) -> &bucket::Bucket<K, V, H> {
        let idx = self.hasher.hash_one(key) % self.shards;
        &self.buckets[idx as usize]
    }

    /// Look up `key`, loading it through the loader on a miss. A hit
    /// slides the entry's eviction deadline forward.
    pub fn get(&self, key: &K, hint: &H) -> Result<V> {
        self.jump(key).get(key, hint)
    }

    /// Stop all reapers and drop every cached entry. Idempotent.
    pub fn close(&self) {
        for bucket in &self.buckets {
            bucket.close();
        }
    }
}

impl<K, V, H> Drop for Cache<K, V, H>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    H: 'static,
{
    fn drop(&mut self) {
        for bucket in &self.buckets {
            bucket.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn config() -> BucketConfig {
        BucketConfig {
            min_tick: Duration::from_millis(500),
            max_tick: Duration::from_secs(3),
            slide: Duration::from_secs(60),
        }
    }

    fn noop_loader() -> Arc<Loader<String, Vec<u8>, ()>> {
        Arc::new(|_: &String, _: &()| Ok((Vec::new(), Duration::from_secs(1))))
    }

    #[test]
    fn test_config_validation() {
        assert!(Cache::new(0, 4, noop_loader(), None, config()).is_err());
        assert!(Cache::new(1000, 0, noop_loader(), None, config()).is_err());
        assert!(Cache::new(1000, 3, noop_loader(), None, config()).is_err());

        let mut bad = config();
        bad.max_tick = bad.min_tick;
        assert!(Cache::new(1000, 4, noop_loader(), None, bad).is_err());

        let mut bad = config();
        bad.slide = Duration::ZERO;
        assert!(Cache::new(1000, 4, noop_loader(), None, bad).is_err());

        assert!(Cache::new(1000, 4, noop_loader(), None, config()).is_ok());
    }

    #[test]
    fn test_loader_error_surfaces_and_is_not_cached() {
        let first = Arc::new(AtomicBool::new(true));
        let loader_first = Arc::clone(&first);

        let loader: Arc<Loader<String, Vec<u8>, ()>> = Arc::new(move |_: &String, _: &()| {
            if loader_first.swap(false, Ordering::SeqCst) {
                Err(DvxError::Cache("load failed".into()))
            } else {
                Ok((b"value".to_vec(), Duration::from_secs(10)))
            }
        });

        let cache = Cache::new(100, 4, loader, None, config()).unwrap();
        assert!(cache.get(&"key".to_string(), &()).is_err());
        assert_eq!(cache.get(&"key".to_string(), &()).unwrap(), b"value");
        cache.close();
    }

    #[test]
    fn test_close_is_idempotent() {
        let cache = Cache::new(100, 4, noop_loader(), None, config()).unwrap();
        cache.close();
        cache.close();
    }

    // The end-to-end eviction scenario: a loaded key expires after its
    // evict-in elapses, while a key that was read again stays alive because
    // the hit slid its deadline forward.
    #[test]
    fn test_timed_eviction_with_slide() {
        let evicted1 = Arc::new(AtomicBool::new(false));
        let evicted2 = Arc::new(AtomicBool::new(false));
        let load1 = Arc::new(AtomicBool::new(false));
        let load2 = Arc::new(AtomicBool::new(false));

        let loader: Arc<Loader<String, Vec<u8>, ()>> = {
            let load1 = Arc::clone(&load1);
            let load2 = Arc::clone(&load2);
            Arc::new(move |key: &String, _: &()| match key.as_str() {
                "key1" => {
                    load1.store(true, Ordering::SeqCst);
                    Ok((b"private key 1".to_vec(), Duration::from_secs(1)))
                }
                "key2" => {
                    load2.store(true, Ordering::SeqCst);
                    Ok((b"private key 2".to_vec(), Duration::from_secs(1)))
                }
                _ => Err(DvxError::Cache("unknown key".into())),
            })
        };

        let hook: Arc<EvictionHook<String>> = {
            let evicted1 = Arc::clone(&evicted1);
            let evicted2 = Arc::clone(&evicted2);
            Arc::new(move |key: &String| match key.as_str() {
                "key1" => evicted1.store(true, Ordering::SeqCst),
                "key2" => evicted2.store(true, Ordering::SeqCst),
                _ => {}
            })
        };

        let cache = Cache::new(1000, 4, loader, Some(hook), config()).unwrap();

        let x = cache.get(&"key1".to_string(), &()).unwrap();
        assert!(load1.load(Ordering::SeqCst));
        assert_eq!(x, b"private key 1");

        let y = cache.get(&"key2".to_string(), &()).unwrap();
        assert!(load2.load(Ordering::SeqCst));
        assert_eq!(y, b"private key 2");

        // key2 is served from cache; its deadline slides forward.
        load2.store(false, Ordering::SeqCst);
        let y = cache.get(&"key2".to_string(), &()).unwrap();
        assert!(!load2.load(Ordering::SeqCst));
        assert_eq!(y, b"private key 2");

        std::thread::sleep(Duration::from_secs(2));

        assert!(evicted1.load(Ordering::SeqCst));
        assert!(!evicted2.load(Ordering::SeqCst));

        cache.close();
    }

    #[test]
    fn test_hit_does_not_reload() {
        let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let loader: Arc<Loader<String, Vec<u8>, ()>> = {
            let loads = Arc::clone(&loads);
            Arc::new(move |_: &String, _: &()| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok((b"v".to_vec(), Duration::from_secs(30)))
            })
        };

        let cache = Cache::new(100, 4, loader, None, config()).unwrap();
        let started = Instant::now();
        for _ in 0..10 {
            cache.get(&"hot".to_string(), &()).unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        cache.close();
    }
}
