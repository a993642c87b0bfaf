//! Domain events
//!
//! `OrderCreatedEvent` is the body of every message on the order queue.
//! Payloads written before events carried an `event_id` still decode; their
//! order id stands in as the idempotency key.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderItem, OrderStatus};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_id: String,
    #[serde(alias = "id")]
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderCreatedEvent {
    /// Snapshots a persisted order under a fresh event id.
    pub fn from_order(order: &Order) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            items: order.items.clone(),
            total_price: order.total_price,
            status: order.status,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }

    pub fn idempotency_key(&self) -> &str {
        if self.event_id.is_empty() { &self.order_id } else { &self.event_id }
    }

    /// Key for applying one line item, stable across redeliveries.
    pub fn line_key(&self, index: usize) -> String {
        format!("{}:{}", self.idempotency_key(), index)
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> { serde_json::to_vec(self) }

    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> { serde_json::from_slice(payload) }
}

/// A message, or one line item of it, the consumer gave up on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub event_id: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub quantity: Option<u32>,
    pub reason: String,
    pub attempt: u32,
    /// Raw body, kept only when it could not be decoded.
    pub payload: Option<String>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn for_item(event: &OrderCreatedEvent, item: &OrderItem, reason: impl Into<String>, attempt: u32) -> Self {
        Self {
            event_id: Some(event.idempotency_key().to_string()),
            order_id: Some(event.order_id.clone()),
            product_id: Some(item.product_id.clone()),
            quantity: Some(item.quantity),
            reason: reason.into(),
            attempt,
            payload: None,
            failed_at: Utc::now(),
        }
    }

    pub fn undecodable(payload: &[u8], reason: impl Into<String>, attempt: u32) -> Self {
        Self {
            event_id: None,
            order_id: None,
            product_id: None,
            quantity: None,
            reason: reason.into(),
            attempt,
            payload: Some(String::from_utf8_lossy(payload).into_owned()),
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::NewOrder;

    fn order() -> Order {
        Order::create(NewOrder {
            user_id: "U1".into(),
            items: vec![OrderItem { product_id: "P1".into(), quantity: 2 }],
            total_price: Decimal::new(40, 0),
        })
        .unwrap()
    }

    #[test]
    fn test_event_snapshots_order() {
        let order = order();
        let event = OrderCreatedEvent::from_order(&order);
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.items, order.items);
        assert!(!event.event_id.is_empty());
        assert_eq!(event.line_key(0), format!("{}:0", event.event_id));

        let decoded = OrderCreatedEvent::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_baseline_payload_without_event_id() {
        let payload = br#"{
            "id": "order-7",
            "user_id": "U1",
            "items": [{"product_id": "P1", "quantity": 3}],
            "total_price": "12.50",
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z"
        }"#;
        let event = OrderCreatedEvent::from_slice(payload).unwrap();
        assert_eq!(event.order_id, "order-7");
        assert_eq!(event.idempotency_key(), "order-7");
        assert_eq!(event.line_key(0), "order-7:0");
        assert_eq!(event.items[0].quantity, 3);
    }

    #[test]
    fn test_dead_letter_keeps_undecodable_body() {
        let letter = DeadLetter::undecodable(b"not json", "expected value", 1);
        assert_eq!(letter.payload.as_deref(), Some("not json"));
        assert!(letter.order_id.is_none());
    }
}
