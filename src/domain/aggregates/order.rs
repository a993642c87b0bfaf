//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ports::store::Document;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem { pub product_id: String, pub quantity: u32 }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Completed, Cancelled }

/// A proposed order as submitted by a caller.
#[derive(Clone, Debug, PartialEq)]
pub struct NewOrder { pub user_id: String, pub items: Vec<OrderItem>, pub total_price: Decimal }

/// Replacement of an order's contents. `status: None` keeps the current status.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderUpdate { pub user_id: String, pub items: Vec<OrderItem>, pub total_price: Decimal, pub status: Option<OrderStatus> }

impl Order {
    /// Validates the proposal and stamps a fresh id, `pending` status and
    /// creation time.
    pub fn create(new: NewOrder) -> Result<Self, OrderError> {
        validate(&new.user_id, &new.items, new.total_price)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            items: new.items,
            total_price: new.total_price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the mutable fields. Identity and `created_at` are kept.
    pub fn apply(&mut self, update: OrderUpdate) -> Result<(), OrderError> {
        validate(&update.user_id, &update.items, update.total_price)?;
        self.user_id = update.user_id;
        self.items = update.items;
        self.total_price = update.total_price;
        if let Some(status) = update.status {
            self.status = status;
        }
        self.touch();
        Ok(())
    }

    pub fn validate(&self) -> Result<(), OrderError> { validate(&self.user_id, &self.items, self.total_price) }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn validate(user_id: &str, items: &[OrderItem], total_price: Decimal) -> Result<(), OrderError> {
    if user_id.trim().is_empty() { return Err(OrderError::MissingUserId); }
    if items.is_empty() { return Err(OrderError::NoItems); }
    for (index, item) in items.iter().enumerate() {
        if item.product_id.trim().is_empty() { return Err(OrderError::MissingProductId { index }); }
        if item.quantity == 0 { return Err(OrderError::NonPositiveQuantity { index }); }
    }
    if total_price.is_sign_negative() { return Err(OrderError::NegativeTotal); }
    Ok(())
}

impl Document for Order {
    const COLLECTION: &'static str = "orders";
    fn id(&self) -> &str { &self.id }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("user id cannot be empty")]
    MissingUserId,
    #[error("order must have at least one item")]
    NoItems,
    #[error("item {index} must have a product id")]
    MissingProductId { index: usize },
    #[error("item {index} quantity must be positive")]
    NonPositiveQuantity { index: usize },
    #[error("total price cannot be negative")]
    NegativeTotal,
}

impl From<OrderError> for crate::ServiceError {
    fn from(err: OrderError) -> Self { Self::Validation(err.to_string()) }
}
