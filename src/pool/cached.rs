//! A caching layer over any [`KeyPool`].
//!
//! Repeated derivations for hot key rings are answered from memory instead
//! of re-deriving through the root (which for an HSM-backed pool means a
//! full PKCS#11 session round-trip). Cached keys live at most `alive_time`
//! and may be displaced sooner by page replacement.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DvxError, Result};
use crate::pool::KeyPool;
use crate::sensitive::SecretBytes;
use crate::tearc;

/// Configuration of the caching pool. Every field is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TearcConfig {
    /// Total number of cache slots, e.g. 65536.
    pub size: usize,
    /// Number of independent buckets, e.g. 64. Must divide `size` evenly.
    pub shards: usize,
    /// Minimum amount of time between bucket reaper runs.
    pub min_tick: Duration,
    /// Maximum amount of time between bucket reaper runs.
    pub max_tick: Duration,
    /// How long cached keys stay alive in memory at maximum. They may get
    /// replaced sooner by page replacement. A cache hit re-arms an entry
    /// to this lifetime.
    pub alive_time: Duration,
}

/// Cache entries are keyed by requested length and key-ring bytes, so 32-
/// and 64-byte derivations of the same ring never alias.
type CacheKey = (usize, Vec<u8>);

/// A [`KeyPool`] that caches the derivations of a wrapped pool.
pub struct CachedPool {
    src: Arc<dyn KeyPool>,
    cache: tearc::Cache<CacheKey, SecretBytes, usize>,
}

impl CachedPool {
    pub fn new(config: &TearcConfig, pool: Arc<dyn KeyPool>) -> Result<Self> {
        let src = Arc::clone(&pool);
        let alive_time = config.alive_time;
        let loader: Arc<tearc::Loader<CacheKey, SecretBytes, usize>> =
            Arc::new(move |key: &CacheKey, key_len: &usize| {
                debug!(key_len, "loading key into cache");
                let value = match *key_len {
                    32 => src.kdf32(&key.1)?,
                    64 => src.kdf64(&key.1)?,
                    n => {
                        return Err(DvxError::Cache(format!(
                            "unsupported key length hint: {}",
                            n
                        )))
                    }
                };
                Ok((value, alive_time))
            });

        let evicted: Arc<tearc::EvictionHook<CacheKey>> = Arc::new(|key: &CacheKey| {
            info!(key_len = key.0, "evicted key from cache");
        });

        let cache = tearc::Cache::new(
            config.size,
            config.shards,
            loader,
            Some(evicted),
            tearc::BucketConfig {
                min_tick: config.min_tick,
                max_tick: config.max_tick,
                slide: config.alive_time,
            },
        )?;

        Ok(Self { src: pool, cache })
    }
}

impl KeyPool for CachedPool {
    fn kdf32(&self, key_ring: &[u8]) -> Result<SecretBytes> {
        self.cache.get(&(32, key_ring.to_vec()), &32)
    }

    fn kdf64(&self, key_ring: &[u8]) -> Result<SecretBytes> {
        self.cache.get(&(64, key_ring.to_vec()), &64)
    }

    fn close(&self) -> Result<()> {
        self.cache.close();
        self.src.close()
    }
}
