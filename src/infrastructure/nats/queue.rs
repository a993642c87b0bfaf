//! Order queue on NATS JetStream.
//!
//! The order subject lives in a work-queue stream consumed by one durable
//! pull consumer with explicit acks. Dead letters go to their own subject in
//! a separate limits-retention stream.

use std::fmt::Display;
use std::time::Duration;

use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
use async_nats::jetstream::{self, AckKind, Context};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use crate::domain::events::{DeadLetter, OrderCreatedEvent};
use crate::ports::queue::{
    DeadLetterSink, Delivery, DeliveryHandle, MessageSource, OrderEventPublisher, QueueError,
};

fn unavailable(e: impl Display) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

/// Stream name for a subject: upper-cased, anything outside `[A-Z0-9_-]`
/// replaced by `_`.
fn stream_name(subject: &str) -> String {
    subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

async fn ensure_stream(jetstream: &Context, subject: &str, retention: RetentionPolicy) -> Result<(), QueueError> {
    let name = stream_name(subject);
    jetstream
        .get_or_create_stream(StreamConfig {
            name: name.clone(),
            subjects: vec![subject.to_string()],
            retention,
            ..Default::default()
        })
        .await
        .map_err(unavailable)?;
    info!(stream = %name, subject, "JetStream stream ready");
    Ok(())
}

#[derive(Clone)]
pub struct NatsOrderQueue {
    jetstream: Context,
    subject: String,
    dead_letter_subject: String,
}

impl NatsOrderQueue {
    /// Creates the order and dead-letter streams if they do not exist yet.
    pub async fn new(
        jetstream: Context,
        subject: impl Into<String>,
        dead_letter_subject: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let queue = Self { jetstream, subject: subject.into(), dead_letter_subject: dead_letter_subject.into() };
        ensure_stream(&queue.jetstream, &queue.subject, RetentionPolicy::WorkQueue).await?;
        ensure_stream(&queue.jetstream, &queue.dead_letter_subject, RetentionPolicy::Limits).await?;
        Ok(queue)
    }

    /// Binds the durable consumer `name`. After `max_deliver` deliveries the
    /// server stops redelivering a message.
    pub async fn subscribe(&self, name: &str, max_deliver: u32) -> Result<NatsSubscription, QueueError> {
        let stream = self.jetstream.get_stream(stream_name(&self.subject)).await.map_err(unavailable)?;
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                name,
                pull::Config {
                    durable_name: Some(name.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: i64::from(max_deliver),
                    ..Default::default()
                },
            )
            .await
            .map_err(unavailable)?;
        let messages = consumer.messages().await.map_err(unavailable)?;
        info!(consumer = name, subject = %self.subject, "Subscribed to order queue");
        Ok(NatsSubscription { messages })
    }

    pub fn dead_letters(&self) -> NatsDeadLetters {
        NatsDeadLetters { jetstream: self.jetstream.clone(), subject: self.dead_letter_subject.clone() }
    }
}

#[async_trait]
impl OrderEventPublisher for NatsOrderQueue {
    async fn publish(&self, event: &OrderCreatedEvent) -> Result<(), QueueError> {
        let payload = event.to_bytes()?;
        // JetStream drops a re-publish with the same id inside its dedup window.
        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", event.idempotency_key());
        self.jetstream
            .publish_with_headers(self.subject.clone(), headers, payload.into())
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

pub struct NatsSubscription {
    messages: pull::Stream,
}

#[async_trait]
impl MessageSource for NatsSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, QueueError>> {
        let message = match self.messages.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(unavailable(e))),
        };
        let attempt = message
            .info()
            .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
            .unwrap_or(1);
        let payload = message.payload.to_vec();
        Some(Ok(Delivery::new(payload, attempt, Box::new(NatsHandle { message }))))
    }
}

struct NatsHandle {
    message: jetstream::Message,
}

#[async_trait]
impl DeliveryHandle for NatsHandle {
    async fn ack(&self) -> Result<(), QueueError> {
        self.message.ack().await.map_err(unavailable)
    }

    async fn retry(&self, delay: Duration) -> Result<(), QueueError> {
        self.message.ack_with(AckKind::Nak(Some(delay))).await.map_err(unavailable)
    }

    async fn reject(&self) -> Result<(), QueueError> {
        self.message.ack_with(AckKind::Term).await.map_err(unavailable)
    }
}

pub struct NatsDeadLetters {
    jetstream: Context,
    subject: String,
}

#[async_trait]
impl DeadLetterSink for NatsDeadLetters {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(letter)?;
        self.jetstream
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
