//! In-process order queue with at-least-once delivery.
//!
//! `ack` and `reject` settle a delivery for good; `retry` puts the message
//! back with its attempt counter bumped. A delivery dropped without settling
//! is lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::events::{DeadLetter, OrderCreatedEvent};
use crate::ports::queue::{
    DeadLetterSink, Delivery, DeliveryHandle, MessageSource, OrderEventPublisher, QueueError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Settlements {
    pub acked: usize,
    pub retried: usize,
    pub rejected: usize,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<VecDeque<(Vec<u8>, u32)>>,
    settlements: Mutex<Settlements>,
    notify: Notify,
    closed: AtomicBool,
    publish_offline: AtomicBool,
}

impl Inner {
    fn enqueue(&self, payload: Vec<u8>, attempt: u32) {
        lock(&self.pending).push_back((payload, attempt));
        self.notify.notify_one();
    }
}

#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues raw bytes as a first delivery.
    pub fn push_raw(&self, payload: impl Into<Vec<u8>>) {
        self.inner.enqueue(payload.into(), 1);
    }

    pub fn subscribe(&self) -> InMemorySubscription {
        InMemorySubscription { inner: Arc::clone(&self.inner) }
    }

    /// Messages waiting for delivery.
    pub fn len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settlements(&self) -> Settlements {
        *lock(&self.inner.settlements)
    }

    /// Makes `publish` fail until switched back.
    pub fn set_publish_offline(&self, offline: bool) {
        self.inner.publish_offline.store(offline, Ordering::SeqCst);
    }

    /// Wakes the subscriber; it returns `None` once the backlog is drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

#[async_trait]
impl OrderEventPublisher for InMemoryQueue {
    async fn publish(&self, event: &OrderCreatedEvent) -> Result<(), QueueError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        if self.inner.publish_offline.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("order queue is offline".into()));
        }
        self.inner.enqueue(event.to_bytes()?, 1);
        Ok(())
    }
}

pub struct InMemorySubscription {
    inner: Arc<Inner>,
}

impl InMemorySubscription {
    /// Next delivery if one is waiting right now.
    pub fn try_next(&mut self) -> Option<Delivery> {
        let (payload, attempt) = lock(&self.inner.pending).pop_front()?;
        let handle = InMemoryHandle { inner: Arc::clone(&self.inner), payload: payload.clone(), attempt };
        Some(Delivery::new(payload, attempt, Box::new(handle)))
    }
}

#[async_trait]
impl MessageSource for InMemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, QueueError>> {
        loop {
            if let Some(delivery) = self.try_next() {
                return Some(Ok(delivery));
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }
}

struct InMemoryHandle {
    inner: Arc<Inner>,
    payload: Vec<u8>,
    attempt: u32,
}

#[async_trait]
impl DeliveryHandle for InMemoryHandle {
    async fn ack(&self) -> Result<(), QueueError> {
        lock(&self.inner.settlements).acked += 1;
        Ok(())
    }

    async fn retry(&self, delay: Duration) -> Result<(), QueueError> {
        lock(&self.inner.settlements).retried += 1;
        let (inner, payload, attempt) = (Arc::clone(&self.inner), self.payload.clone(), self.attempt + 1);
        if delay.is_zero() {
            inner.enqueue(payload, attempt);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.enqueue(payload, attempt);
            });
        }
        Ok(())
    }

    async fn reject(&self) -> Result<(), QueueError> {
        lock(&self.inner.settlements).rejected += 1;
        Ok(())
    }
}

/// Dead-letter sink that keeps letters in memory.
#[derive(Default)]
pub struct InMemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        lock(&self.letters).clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        tracing::warn!(
            order_id = ?letter.order_id,
            product_id = ?letter.product_id,
            reason = %letter.reason,
            "Dead-lettered order event"
        );
        lock(&self.letters).push(letter.clone());
        Ok(())
    }
}
