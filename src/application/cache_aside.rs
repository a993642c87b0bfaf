//! Read-through caching over the `Cache` port.
//!
//! Cache failures never fail a request: a broken or undecodable entry is a
//! miss, and failed writes or deletes are logged and skipped. With key locks
//! enabled, populating a key after a miss and invalidating that key are
//! serialized, so a population that read the store before a write cannot
//! land after the write's invalidation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::ports::cache::Cache;

#[derive(Clone)]
pub struct CacheAside {
    cache: Arc<dyn Cache>,
    locks: Option<Arc<KeyLocks>>,
}

impl CacheAside {
    pub fn new(cache: Arc<dyn Cache>, populate_lock: bool) -> Self {
        let locks = populate_lock.then(|| Arc::new(KeyLocks::default()));
        Self { cache, locks }
    }

    /// Returns the cached value for `key`, or runs `load`, caches its result
    /// and returns it. Errors from `load` are returned and nothing is cached.
    pub async fn get_or_load<T, F, Fut, E>(&self, key: &str, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.lookup(key).await {
            return Ok(hit);
        }

        let _guard = match &self.locks {
            Some(locks) => {
                let guard = locks.acquire(key).await;
                // Someone may have populated it while we waited.
                if let Some(hit) = self.lookup(key).await {
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        let value = load().await?;
        self.store(key, &value).await;
        Ok(value)
    }

    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(cache_key = key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(cache_key = key, error = %e, "Cache read failed, falling back to store");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(cache_key = key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(cache_key = key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache_key = key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, bytes).await {
            warn!(cache_key = key, error = %e, "Cache write failed");
        }
    }

    /// Deletes every key. Each delete waits for an in-flight population of
    /// the same key.
    pub async fn invalidate(&self, keys: &[&str]) {
        for key in keys {
            let _guard = match &self.locks {
                Some(locks) => Some(locks.acquire(key).await),
                None => None,
            };
            if let Err(e) = self.cache.delete(key).await {
                warn!(cache_key = key, error = %e, "Cache invalidation failed");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One async mutex per key, dropped from the map once nobody holds or awaits it.
#[derive(Default)]
struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(self: &Arc<Self>, key: &str) -> KeyGuard {
        let slot = Arc::clone(lock(&self.slots).entry(key.to_string()).or_default());
        let held = Arc::clone(&slot).lock_owned().await;
        KeyGuard { locks: Arc::clone(self), key: key.to_string(), slot, held: Some(held) }
    }
}

struct KeyGuard {
    locks: Arc<KeyLocks>,
    key: String,
    slot: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.held.take();
        let mut slots = lock(&self.locks.slots);
        // The map and this guard are the only owners left.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
