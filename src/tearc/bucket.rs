//! A single cache bucket: an ARC cache paired with a deadline heap and a
//! reaper thread that enforces timed eviction.

use std::hash::Hash;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use caches::{AdaptiveCache, Cache as _};
use tracing::debug;

use crate::error::{DvxError, Result};
use crate::tearc::heap::EvictionQueue;
use crate::tearc::{EvictionHook, Loader};

/// Timing behavior of a bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    /// Minimum amount of time between reaper runs.
    pub min_tick: Duration,
    /// Maximum amount of time between reaper runs.
    pub max_tick: Duration,
    /// How far a hit pushes an entry's eviction deadline into the future.
    pub slide: Duration,
}

/// Extra sleep added after a pending deadline so the reaper wakes just
/// past it instead of just short of it.
const REAP_SLACK: Duration = Duration::from_millis(50);

struct BucketState<K: Hash + Eq, V> {
    arc: AdaptiveCache<K, V>,
    queue: EvictionQueue<K>,
}

pub(crate) struct Bucket<K, V, H>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    H: 'static,
{
    config: BucketConfig,
    loader: Arc<Loader<K, V, H>>,
    state: Arc<Mutex<BucketState<K, V>>>,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V, H> Bucket<K, V, H>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    H: 'static,
{
    pub fn new(
        id: usize,
        capacity: usize,
        loader: Arc<Loader<K, V, H>>,
        evicted: Arc<EvictionHook<K>>,
        config: BucketConfig,
    ) -> Result<Self> {
        let arc = AdaptiveCache::new(capacity)
            .map_err(|e| DvxError::Cache(format!("failed to build arc cache: {}", e)))?;

        let state = Arc::new(Mutex::new(BucketState {
            arc,
            queue: EvictionQueue::new(),
        }));

        let (close_tx, close_rx) = mpsc::channel();
        let reaper = spawn_reaper(id, config, Arc::clone(&state), evicted, close_rx);

        Ok(Self {
            config,
            loader,
            state,
            close_tx: Mutex::new(Some(close_tx)),
            reaper: Mutex::new(Some(reaper)),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, BucketState<K, V>>> {
        self.state
            .lock()
            .map_err(|_| DvxError::Cache("bucket lock poisoned".into()))
    }

    /// Look up `key`, loading it on a miss. A hit slides the entry's
    /// eviction deadline forward by the configured amount.
    pub fn get(&self, key: &K, hint: &H) -> Result<V> {
        let mut state = self.lock_state()?;

        let cached = state.arc.get(key).cloned();
        if let Some(value) = cached {
            let deadline = Instant::now() + self.config.slide;
            state.queue.update(key, deadline);
            return Ok(value);
        }

        // Loader failure leaves the bucket untouched; the next request for
        // this key retries organically.
        let (value, evict_in) = (self.loader)(key, hint)?;
        let _ = state.arc.put(key.clone(), value.clone());
        state.queue.push(key.clone(), Instant::now() + evict_in);

        Ok(value)
    }

    /// Stop the reaper and drop all cached entries. Safe to call more than
    /// once.
    pub fn close(&self) {
        let sender = match self.close_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if sender.is_none() {
            return;
        }
        // Dropping the sender disconnects the channel and wakes the reaper.
        drop(sender);

        let handle = match self.reaper.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        if let Ok(mut state) = self.state.lock() {
            state.arc.purge();
            state.queue.clear();
        }
    }
}

fn spawn_reaper<K, V>(
    id: usize,
    config: BucketConfig,
    state: Arc<Mutex<BucketState<K, V>>>,
    evicted: Arc<EvictionHook<K>>,
    close_rx: mpsc::Receiver<()>,
) -> JoinHandle<()>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    thread::spawn(move || {
        let mut next_tick = config.min_tick;

        loop {
            match close_rx.recv_timeout(next_tick) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let mut due: Vec<K> = Vec::new();
            let (timeout, remaining) = {
                let Ok(mut state) = state.lock() else { return };
                let now = Instant::now();

                let timeout = loop {
                    match state.queue.peek().map(|(_, deadline)| deadline) {
                        None => break config.min_tick,
                        Some(deadline) if deadline <= now => {
                            if let Some((key, _)) = state.queue.pop() {
                                // The eviction callback only fires when the
                                // entry was still resident; page replacement
                                // may have displaced it earlier.
                                if state.arc.remove(&key).is_some() {
                                    due.push(key);
                                }
                            }
                        }
                        Some(deadline) => break deadline - now + REAP_SLACK,
                    }
                };

                (timeout, state.queue.len())
            };

            // Callbacks run outside the bucket lock.
            for key in &due {
                (evicted)(key);
            }
            if !due.is_empty() {
                debug!(
                    bucket = id,
                    evicted = due.len(),
                    remaining,
                    "reaper evicted due entries"
                );
            }

            next_tick = timeout.clamp(config.min_tick, config.max_tick);
        }
    })
}
