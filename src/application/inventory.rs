//! Inventory use cases: the product catalog and its stock levels.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use super::CacheAside;
use crate::domain::aggregates::{NewProduct, Product, ProductError, ProductUpdate};
use crate::ports::cache::keys;
use crate::ports::store::{ProductStore, StockDecrement};
use crate::{Result, ServiceError};

/// Outcome of a keyed stock decrement.
#[derive(Debug, Clone, PartialEq)]
pub enum DecreaseOutcome {
    Decreased(Product),
    /// The key was applied before; stock is unchanged.
    Duplicate,
}

pub struct InventoryService {
    store: Arc<dyn ProductStore>,
    cache: CacheAside,
}

fn product_error(err: ProductError, product_id: &str) -> ServiceError {
    match err {
        ProductError::InsufficientStock { available, requested } => {
            ServiceError::InsufficientStock { product_id: product_id.to_string(), available, requested }
        }
        other => ServiceError::Validation(other.to_string()),
    }
}

impl InventoryService {
    pub fn new(store: Arc<dyn ProductStore>, cache: CacheAside) -> Self {
        Self { store, cache }
    }

    pub async fn create_product(&self, new: NewProduct) -> Result<Product> {
        let product = Product::create(new).map_err(|e| product_error(e, ""))?;
        self.ensure_name_free(&product).await?;
        self.store
            .insert(&product)
            .await
            .map_err(|e| ServiceError::from_store(e, "product", &product.id))?;
        self.invalidate(&product.id).await;

        info!(product_id = %product.id, name = %product.name, stock = product.stock, "Product created");
        Ok(product)
    }

    pub async fn get_product(&self, id: &str) -> Result<Product> {
        self.cache
            .get_or_load(&keys::product(id), || async { self.fetch(id).await })
            .await
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        self.cache
            .get_or_load(keys::ALL_PRODUCTS, || async { self.store.list().await.map_err(ServiceError::Store) })
            .await
    }

    pub async fn update_product(&self, id: &str, update: ProductUpdate) -> Result<Product> {
        let mut product = self.fetch(id).await?;
        product.apply(update).map_err(|e| product_error(e, id))?;
        self.ensure_name_free(&product).await?;
        self.store
            .update(&product)
            .await
            .map_err(|e| ServiceError::from_store(e, "product", id))?;
        self.invalidate(id).await;

        info!(product_id = %id, "Product updated");
        Ok(product)
    }

    pub async fn delete_product(&self, id: &str) -> Result<()> {
        if !self.store.delete(id).await.map_err(ServiceError::Store)? {
            return Err(ServiceError::not_found("product", id));
        }
        self.invalidate(id).await;

        info!(product_id = %id, "Product deleted");
        Ok(())
    }

    /// Removes `quantity` units, failing with `InsufficientStock` rather than
    /// going below zero.
    pub async fn decrease_stock(&self, id: &str, quantity: u32) -> Result<Product> {
        match self.decrement(id, quantity, None).await? {
            DecreaseOutcome::Decreased(product) => Ok(product),
            DecreaseOutcome::Duplicate => Err(ServiceError::Conflict("stock decrement already applied".into())),
        }
    }

    /// Like `decrease_stock`, but the store records `key` in the same write;
    /// a repeated key returns `Duplicate` and leaves stock alone.
    pub async fn decrease_stock_idempotent(&self, id: &str, quantity: u32, key: &str) -> Result<DecreaseOutcome> {
        self.decrement(id, quantity, Some(key)).await
    }

    /// Marks a keyed line item as settled without changing stock, so a later
    /// decrement under the same key is a `Duplicate`.
    pub async fn settle_line(&self, id: &str, quantity: u32, key: &str) -> Result<()> {
        self.store.settle_key(key, id, quantity).await.map_err(ServiceError::Store)?;
        debug!(product_id = %id, key = %key, "Line item settled without decrement");
        Ok(())
    }

    /// Forgets settled keys older than `retention`.
    pub async fn prune_settled_keys(&self, retention: Duration) -> Result<u64> {
        let Some(cutoff) = chrono::Duration::from_std(retention).ok().and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let pruned = self.store.prune_settled_keys(cutoff).await.map_err(ServiceError::Store)?;
        if pruned > 0 {
            info!(pruned, "Pruned settled stock keys");
        }
        Ok(pruned)
    }

    /// Whether at least `quantity` units are in stock right now.
    pub async fn check_stock(&self, id: &str, quantity: u32) -> Result<bool> {
        Ok(self.fetch(id).await?.has_stock(quantity))
    }

    /// Case-insensitive substring search on name and description. Not cached.
    pub async fn search_products(&self, query: &str, category_id: Option<&str>) -> Result<Vec<Product>> {
        self.store.search(query, category_id).await.map_err(ServiceError::Store)
    }

    /// Overwrites the stock level, e.g. after a stock take.
    pub async fn set_stock(&self, id: &str, stock: u32) -> Result<Product> {
        let mut product = self.fetch(id).await?;
        product.set_stock(stock);
        self.store
            .update(&product)
            .await
            .map_err(|e| ServiceError::from_store(e, "product", id))?;
        self.invalidate(id).await;

        info!(product_id = %id, stock, "Stock level set");
        Ok(product)
    }

    async fn decrement(&self, id: &str, quantity: u32, key: Option<&str>) -> Result<DecreaseOutcome> {
        if quantity == 0 {
            return Err(product_error(ProductError::NonPositiveQuantity, id));
        }
        let outcome = self
            .store
            .decrement_stock(id, quantity, key)
            .await
            .map_err(ServiceError::Store)?;

        match outcome {
            StockDecrement::Applied(product) => {
                self.invalidate(id).await;
                info!(product_id = %id, quantity, remaining = product.stock, "Stock decreased");
                Ok(DecreaseOutcome::Decreased(product))
            }
            StockDecrement::AlreadySettled => {
                // A previous attempt may have stopped before invalidating.
                self.invalidate(id).await;
                debug!(product_id = %id, key = ?key, "Stock decrement already applied");
                Ok(DecreaseOutcome::Duplicate)
            }
            StockDecrement::Insufficient { available } => Err(ServiceError::InsufficientStock {
                product_id: id.to_string(),
                available,
                requested: quantity,
            }),
            StockDecrement::NotFound => Err(ServiceError::not_found("product", id)),
        }
    }

    async fn fetch(&self, id: &str) -> Result<Product> {
        self.store
            .get(id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("product", id))
    }

    /// Pre-check only; the store enforces uniqueness on write.
    async fn ensure_name_free(&self, product: &Product) -> Result<()> {
        match self.store.find_by_unique(&product.name).await.map_err(ServiceError::Store)? {
            Some(existing) if existing.id != product.id => {
                Err(ServiceError::Conflict(format!("product named '{}' already exists", product.name)))
            }
            _ => Ok(()),
        }
    }

    async fn invalidate(&self, id: &str) {
        self.cache.invalidate(&[&keys::product(id), keys::ALL_PRODUCTS]).await;
    }
}
