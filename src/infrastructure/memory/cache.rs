//! In-process TTL cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::ports::cache::{Cache, CacheError};

pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (Instant, Vec<u8>)>>,
    ttl: Duration,
    unavailable: AtomicBool,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl, unavailable: AtomicBool::new(false) }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.get(key).is_some_and(|(expires, _)| *expires > Instant::now())
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((expires, value)) if *expires > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it unless it was refreshed meanwhile.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(expires, _)| *expires <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.check_available()?;
        let expires = Instant::now() + self.ttl;
        self.entries.write().await.insert(key.to_string(), (expires, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check_available()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new(Duration::from_secs(300));
        cache.set("order:1", b"{}".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("order:1").await.unwrap(), Some(b"{}".to_vec()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("order:1").await.unwrap(), None);
        assert!(!cache.contains("order:1").await);
    }

    #[tokio::test]
    async fn delete_and_outage() {
        let cache = InMemoryCache::new(Duration::from_secs(60));
        cache.set("k", vec![1]).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set_unavailable(true);
        assert!(matches!(cache.get("k").await, Err(CacheError::Unavailable(_))));
    }
}
