//! NATS JetStream adapters: the order queue and key-value caches.

mod kv_cache;
mod queue;

pub use kv_cache::NatsKvCache;
pub use queue::{NatsDeadLetters, NatsOrderQueue, NatsSubscription};
