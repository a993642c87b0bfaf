//! Document store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::domain::aggregates::Product;

/// An entity persisted as one document in a named collection.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    /// Name of the field behind `unique_key`, for error messages.
    const UNIQUE_FIELD: &'static str = "unique key";

    fn id(&self) -> &str;

    /// Field value that must be unique within the collection, if any.
    fn unique_key(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait DocumentStore<D: Document>: Send + Sync {
    /// Fails with `Duplicate` if the id or unique key is already taken.
    async fn insert(&self, doc: &D) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<D>, StoreError>;

    async fn find_by_unique(&self, key: &str) -> Result<Option<D>, StoreError>;

    /// All documents in insertion order.
    async fn list(&self) -> Result<Vec<D>, StoreError>;

    /// Replaces an existing document. Fails with `NotFound` if absent.
    async fn update(&self, doc: &D) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Result of a conditional stock decrement.
#[derive(Debug, Clone, PartialEq)]
pub enum StockDecrement {
    Applied(Product),
    /// The idempotency key was settled earlier, by a decrement or a dead letter.
    AlreadySettled,
    Insufficient { available: u32 },
    NotFound,
}

#[async_trait]
pub trait ProductStore: DocumentStore<Product> {
    /// Atomically subtracts `quantity` if the product has at least that much
    /// stock. When a key is given it is recorded in the same write, and a
    /// repeated key leaves stock untouched.
    async fn decrement_stock(
        &self,
        id: &str,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<StockDecrement, StoreError>;

    /// Records `idempotency_key` as settled without touching stock. A later
    /// decrement with the same key returns `AlreadySettled`. Recording a key
    /// twice is not an error.
    async fn settle_key(&self, idempotency_key: &str, product_id: &str, quantity: u32) -> Result<(), StoreError>;

    /// Forgets keys settled before `cutoff` and returns how many went.
    async fn prune_settled_keys(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Case-insensitive match on name or description, optionally within one
    /// category.
    async fn search(&self, query: &str, category_id: Option<&str>) -> Result<Vec<Product>, StoreError>;
}
