//! Cache of loaded datasets, keyed by object key.

use crate::dataset::Dataset;
use crate::error::EnergyVizError;
use crate::metrics::{DATASET_CACHE_HITS, DATASET_CACHE_MISSES};

use cached::{Cached, TimedSizedCache};
use hashbrown::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// A size- and time-bounded cache of datasets.
///
/// [DatasetCache::get_or_load] runs at most one load per key at a time. Concurrent callers for
/// the same key wait for the load in progress and then use its result. A failed load leaves
/// nothing in the cache, so the next caller tries again.
pub struct DatasetCache {
    /// Loaded datasets. `None` when caching is disabled.
    entries: Option<Mutex<TimedSizedCache<String, Arc<Dataset>>>>,
    /// One lock per key with a load in progress.
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// A caller's claim on a key's load lock.
///
/// Dropping the last claim removes the key from the in-flight map, including when the caller's
/// future is dropped part way through a load.
struct InflightClaim<'a> {
    inflight: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    key: &'a str,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> InflightClaim<'a> {
    fn new(inflight: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>, key: &'a str) -> Self {
        let lock = {
            let mut map = inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                map.entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        InflightClaim {
            inflight,
            key,
            lock,
        }
    }
}

impl Drop for InflightClaim<'_> {
    fn drop(&mut self) {
        let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // The map holds one reference and this claim the other.
        if map
            .get(self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2)
        {
            map.remove(self.key);
        }
    }
}

impl DatasetCache {
    /// Returns a new DatasetCache.
    ///
    /// # Arguments
    ///
    /// * `size`: Maximum number of datasets to keep. 0 disables caching.
    /// * `ttl`: Seconds a dataset stays valid after it is loaded
    pub fn new(size: usize, ttl: u64) -> Self {
        let entries = (size > 0).then(|| Mutex::new(TimedSizedCache::with_size_and_lifespan(size, ttl)));
        DatasetCache {
            entries,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a cached dataset, if present and not expired.
    pub fn get(&self, key: &str) -> Option<Arc<Dataset>> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.cache_get(&key.to_string()).cloned()
    }

    fn insert(&self, key: &str, dataset: Arc<Dataset>) {
        if let Some(entries) = &self.entries {
            let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.cache_set(key.to_string(), dataset);
        }
    }

    /// Number of cached datasets, including any that have expired but not yet been evicted.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cache_size()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the dataset for a key, loading it on a miss.
    ///
    /// # Arguments
    ///
    /// * `key`: Object key of the dataset
    /// * `load`: Retrieves and parses the dataset
    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> Result<Arc<Dataset>, EnergyVizError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Dataset, EnergyVizError>>,
    {
        if let Some(dataset) = self.get(key) {
            DATASET_CACHE_HITS.inc();
            tracing::debug!(key, "dataset cache hit");
            return Ok(dataset);
        }
        DATASET_CACHE_MISSES.inc();

        let claim = InflightClaim::new(&self.inflight, key);
        let _guard = claim.lock.lock().await;
        // Another caller may have loaded it while we waited.
        if let Some(dataset) = self.get(key) {
            return Ok(dataset);
        }
        tracing::debug!(key, "loading dataset");
        let dataset = Arc::new(load().await?);
        self.insert(key, dataset.clone());
        Ok(dataset)
    }
}
