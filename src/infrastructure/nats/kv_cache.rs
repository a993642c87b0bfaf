//! Cache backed by a JetStream key-value bucket.
//!
//! The bucket's `max_age` is the cache TTL, so expiry is handled by the
//! server.

use std::time::Duration;

use async_nats::jetstream::{kv, Context};
use async_trait::async_trait;
use tracing::info;

use crate::ports::cache::{Cache, CacheError};

pub struct NatsKvCache {
    store: kv::Store,
    ttl: Duration,
}

impl NatsKvCache {
    /// Opens `bucket`, creating it with a `max_age` of `ttl` if missing.
    pub async fn open(jetstream: &Context, bucket: &str, ttl: Duration) -> Result<Self, CacheError> {
        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    history: 1,
                    max_age: ttl,
                    ..Default::default()
                })
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?,
        };
        info!(bucket, ttl_secs = ttl.as_secs(), "Cache bucket ready");
        Ok(Self { store, ttl })
    }
}

/// KV keys allow only `[-/_=.a-zA-Z0-9]`; everything else, `:` included,
/// becomes `=XX`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("={byte:02X}"));
        }
    }
    encoded
}

#[async_trait]
impl Cache for NatsKvCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entry = self
            .store
            .get(encode_key(key))
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(entry.map(|bytes| bytes.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.store
            .put(encode_key(key), value.into())
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store
            .delete(encode_key(key))
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_encoded_for_nats() {
        assert_eq!(encode_key("all_products"), "all_products");
        assert_eq!(encode_key("order:5f2c-9a"), "order=3A5f2c-9a");
        assert_eq!(encode_key("user:a.b"), "user=3Aa=2Eb");
    }
}
