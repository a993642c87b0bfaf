//! In-memory document store.
//!
//! Backs tests and `STORE_BACKEND=memory`. All writes, including the
//! conditional stock decrement, happen under one write lock, so they are
//! atomic with respect to each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::aggregates::Product;
use crate::ports::store::{Document, DocumentStore, ProductStore, StockDecrement, StoreError};

pub struct InMemoryStore<D> {
    state: RwLock<State<D>>,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

struct State<D> {
    docs: HashMap<String, (u64, D)>,
    next_seq: u64,
    /// Settled idempotency keys and when they were recorded.
    settled_keys: HashMap<String, DateTime<Utc>>,
    /// Product id to the number of upcoming decrements that should fail.
    decrement_faults: HashMap<String, u32>,
}

impl<D: Document> Default for InMemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Document> InMemoryStore<D> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                docs: HashMap::new(),
                next_seq: 0,
                settled_keys: HashMap::new(),
                decrement_faults: HashMap::new(),
            }),
            unavailable: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable` until
    /// switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `times` decrements of one product fail with
    /// `StoreError::Unavailable`.
    pub async fn fail_decrements(&self, product_id: &str, times: u32) {
        self.state.write().await.decrement_faults.insert(product_id.to_string(), times);
    }

    /// Number of successful `get`/`list` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Reads a document without going through the port or the fault switch.
    pub async fn peek(&self, id: &str) -> Option<D> {
        self.state.read().await.docs.get(id).map(|(_, doc)| doc.clone())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} store is offline", D::COLLECTION)));
        }
        Ok(())
    }
}

impl<D: Document> State<D> {
    fn unique_taken(&self, doc: &D) -> bool {
        let Some(key) = doc.unique_key() else {
            return false;
        };
        self.docs.values().any(|(_, other)| other.id() != doc.id() && other.unique_key() == Some(key))
    }
}

#[async_trait]
impl<D: Document> DocumentStore<D> for InMemoryStore<D> {
    async fn insert(&self, doc: &D) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.docs.contains_key(doc.id()) {
            return Err(StoreError::Duplicate("id".into()));
        }
        if state.unique_taken(doc) {
            return Err(StoreError::Duplicate(D::UNIQUE_FIELD.into()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.docs.insert(doc.id().to_string(), (seq, doc.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<D>, StoreError> {
        self.check_available()?;
        let found = self.state.read().await.docs.get(id).map(|(_, doc)| doc.clone());
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(found)
    }

    async fn find_by_unique(&self, key: &str) -> Result<Option<D>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.docs.values().map(|(_, doc)| doc).find(|doc| doc.unique_key() == Some(key)).cloned())
    }

    async fn list(&self) -> Result<Vec<D>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut entries: Vec<&(u64, D)> = state.docs.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(entries.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    async fn update(&self, doc: &D) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.unique_taken(doc) {
            return Err(StoreError::Duplicate(D::UNIQUE_FIELD.into()));
        }
        match state.docs.get_mut(doc.id()) {
            Some((_, existing)) => {
                *existing = doc.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.state.write().await.docs.remove(id).is_some())
    }
}

#[async_trait]
impl ProductStore for InMemoryStore<Product> {
    async fn decrement_stock(
        &self,
        id: &str,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<StockDecrement, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(remaining) = state.decrement_faults.get_mut(id).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(StoreError::Unavailable(format!("decrement of {id} failed")));
        }
        if idempotency_key.is_some_and(|key| state.settled_keys.contains_key(key)) {
            return Ok(StockDecrement::AlreadySettled);
        }
        let Some((_, product)) = state.docs.get_mut(id) else {
            return Ok(StockDecrement::NotFound);
        };
        if !product.has_stock(quantity) {
            return Ok(StockDecrement::Insufficient { available: product.stock });
        }
        if product.remove_stock(quantity).is_err() {
            return Ok(StockDecrement::Insufficient { available: product.stock });
        }
        let updated = product.clone();
        if let Some(key) = idempotency_key {
            state.settled_keys.insert(key.to_string(), Utc::now());
        }
        Ok(StockDecrement::Applied(updated))
    }

    async fn settle_key(&self, idempotency_key: &str, _product_id: &str, _quantity: u32) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.write().await.settled_keys.entry(idempotency_key.to_string()).or_insert_with(Utc::now);
        Ok(())
    }

    async fn prune_settled_keys(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let before = state.settled_keys.len();
        state.settled_keys.retain(|_, settled_at| *settled_at >= cutoff);
        Ok((before - state.settled_keys.len()) as u64)
    }

    async fn search(&self, query: &str, category_id: Option<&str>) -> Result<Vec<Product>, StoreError> {
        Ok(self.list().await?.into_iter().filter(|p| p.matches(query, category_id)).collect())
    }
}
