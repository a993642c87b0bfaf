//! Order queue ports: publishing, consuming and dead-lettering.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::{DeadLetter, OrderCreatedEvent};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("event encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue closed")]
    Closed,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderEventPublisher: Send + Sync {
    /// Returns once the queue has durably accepted the event.
    async fn publish(&self, event: &OrderCreatedEvent) -> Result<(), QueueError>;
}

/// Settles one delivered message with the broker.
#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;

    /// Negative acknowledgement; the broker redelivers after `delay`.
    async fn retry(&self, delay: Duration) -> Result<(), QueueError>;

    /// Terminal rejection; the message is never redelivered.
    async fn reject(&self) -> Result<(), QueueError>;
}

pub struct Delivery {
    pub payload: Vec<u8>,
    /// 1 on first delivery.
    pub attempt: u32,
    handle: Box<dyn DeliveryHandle>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, attempt: u32, handle: Box<dyn DeliveryHandle>) -> Self {
        Self { payload, attempt, handle }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.handle.ack().await
    }

    pub async fn retry(self, delay: Duration) -> Result<(), QueueError> {
        self.handle.retry(delay).await
    }

    pub async fn reject(self) -> Result<(), QueueError> {
        self.handle.reject().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("attempt", &self.attempt)
            .field("len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next message. `None` once the source is closed.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, QueueError>>;
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError>;
}
