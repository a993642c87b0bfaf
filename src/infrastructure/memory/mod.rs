//! In-memory adapters for tests and single-process development.

mod cache;
mod queue;
mod store;

pub use cache::InMemoryCache;
pub use queue::{InMemoryDeadLetters, InMemoryQueue, InMemorySubscription, Settlements};
pub use store::InMemoryStore;
