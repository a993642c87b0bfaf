//! Cache port and key layout.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Byte-level key-value cache. Entries expire after the adapter's TTL and are
/// then reported as absent.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    fn ttl(&self) -> Duration;
}

pub mod keys {
    pub const ALL_ORDERS: &str = "orders:all";
    pub const ALL_PRODUCTS: &str = "all_products";
    pub const ALL_USERS: &str = "users:all";

    pub fn order(id: &str) -> String {
        format!("order:{id}")
    }

    pub fn product(id: &str) -> String {
        format!("product:{id}")
    }

    pub fn user(id: &str) -> String {
        format!("user:{id}")
    }
}
