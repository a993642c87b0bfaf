//! Storefront services
//!
//! Orders, inventory and users sold from a shared catalog, each service with
//! its own document store and read-through cache.
//!
//! ## Features
//! - Order creation with an `order_created` event per persisted order
//! - Inventory consumer that applies stock decrements from those events
//! - Cache-aside reads with invalidation on every write path
//! - Postgres/NATS adapters plus in-memory adapters for tests and development
//! - Prometheus counters for HTTP requests and consumer outcomes

use thiserror::Error;

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod metrics;
pub mod ports;

pub use application::{
    CacheAside, ConsumerSettings, DecreaseOutcome, Disposition, InventoryService, OrderService,
    StockConsumer, UserService,
};
pub use config::Config;
pub use domain::aggregates::{Category, NewOrder, NewProduct, NewUser, Order, OrderItem, OrderStatus, Product, User, UserStatus};
pub use domain::events::{DeadLetter, OrderCreatedEvent};

use ports::queue::QueueError;
use ports::store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock for product '{product_id}': available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: u32,
        requested: u32,
    },

    #[error("storage error: {0}")]
    Store(#[source] StoreError),

    #[error("order '{order_id}' was stored but its event was not published")]
    PublishFailed {
        order_id: String,
        #[source]
        source: QueueError,
    },
}

impl ServiceError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Maps a store failure for a single document, keeping `NotFound` and
    /// unique-key violations in the caller-facing taxonomy.
    pub(crate) fn from_store(error: StoreError, entity: &'static str, id: &str) -> Self {
        match error {
            StoreError::NotFound => Self::not_found(entity, id),
            StoreError::Duplicate(field) => Self::Conflict(format!("{entity} with this {field} already exists")),
            other => Self::Store(other),
        }
    }

    /// Infrastructure failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
