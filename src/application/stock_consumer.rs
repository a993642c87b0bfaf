//! Applies `order_created` events to product stock.
//!
//! One message is processed at a time and settled only after every line item
//! has been handled. Each line item is keyed `<event_id>:<index>`, and the key
//! is recorded whether the item was applied or dead-lettered, so a redelivered
//! message never touches a settled item again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{DecreaseOutcome, InventoryService};
use crate::config::Config;
use crate::domain::aggregates::OrderItem;
use crate::domain::events::{DeadLetter, OrderCreatedEvent};
use crate::metrics::{self, DeadLetterReason};
use crate::ports::queue::{DeadLetterSink, Delivery, MessageSource, QueueError};
use crate::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Delivery attempt at which transient failures stop being retried.
    pub max_deliver: u32,
    /// In-process retries per line item before the message is handed back.
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self { max_deliver: 5, retry_attempts: 3, retry_backoff: Duration::from_millis(100) }
    }
}

impl From<&Config> for ConsumerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_deliver: config.consumer_max_deliver.max(1),
            retry_attempts: config.consumer_retry_attempts,
            retry_backoff: config.consumer_retry_backoff(),
        }
    }
}

impl ConsumerSettings {
    /// `retry_backoff * 2^attempt`, saturating.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Retried,
    Rejected,
}

enum ItemResult {
    Done,
    /// Dead-lettered, or nothing more to do for it.
    Skipped,
    /// Still failing transiently; the message must come back.
    Retry,
}

pub struct StockConsumer {
    inventory: Arc<InventoryService>,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: ConsumerSettings,
}

impl StockConsumer {
    pub fn new(inventory: Arc<InventoryService>, dead_letters: Arc<dyn DeadLetterSink>, settings: ConsumerSettings) -> Self {
        Self { inventory, dead_letters, settings }
    }

    /// Consumes until the source closes or `shutdown` resolves. Shutdown is
    /// only observed between messages; a message being handled is finished
    /// and settled first.
    pub async fn run<S>(&self, source: &mut dyn MessageSource, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Stock consumer started");

        loop {
            let next = tokio::select! {
                () = &mut shutdown => {
                    info!("Stock consumer shutting down");
                    break;
                }
                next = source.next_delivery() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let disposition = self.handle(delivery).await;
                    debug!(?disposition, "Delivery settled");
                }
                Some(Err(e)) => {
                    error!(error = %e, "Failed to receive from order queue");
                    tokio::time::sleep(self.settings.backoff(0)).await;
                }
                None => {
                    info!("Order queue closed, stock consumer stopping");
                    break;
                }
            }
        }
    }

    /// Processes one delivery and settles it with the queue.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let disposition = self.process(delivery).await;
        metrics::observe_disposition(disposition);
        disposition
    }

    async fn process(&self, delivery: Delivery) -> Disposition {
        let attempt = delivery.attempt;
        let event = match OrderCreatedEvent::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(attempt, error = %e, "Rejecting undecodable order event");
                let letter = DeadLetter::undecodable(&delivery.payload, e.to_string(), attempt);
                match self.dead_letters.dead_letter(&letter).await {
                    Ok(()) => metrics::observe_dead_letter(DeadLetterReason::Undecodable),
                    Err(dl) => error!(error = %dl, payload = ?letter.payload, "Failed to dead-letter undecodable event"),
                }
                log_settle(delivery.reject().await);
                return Disposition::Rejected;
            }
        };

        let final_attempt = attempt >= self.settings.max_deliver;
        let mut retry = false;
        for (index, item) in event.items.iter().enumerate() {
            match self.process_item(&event, index, item, attempt, final_attempt).await {
                ItemResult::Done | ItemResult::Skipped => {}
                ItemResult::Retry => {
                    retry = true;
                    break;
                }
            }
        }

        if retry {
            let delay = self.settings.backoff(attempt);
            warn!(order_id = %event.order_id, attempt, ?delay, "Handing order event back for redelivery");
            log_settle(delivery.retry(delay).await);
            return Disposition::Retried;
        }

        debug!(order_id = %event.order_id, event_id = %event.idempotency_key(), "Order event processed");
        log_settle(delivery.ack().await);
        Disposition::Acked
    }

    async fn process_item(
        &self,
        event: &OrderCreatedEvent,
        index: usize,
        item: &OrderItem,
        attempt: u32,
        final_attempt: bool,
    ) -> ItemResult {
        let key = event.line_key(index);
        let applied = self
            .retrying(&key, || self.inventory.decrease_stock_idempotent(&item.product_id, item.quantity, &key))
            .await;

        let e = match applied {
            Ok(DecreaseOutcome::Decreased(_)) => return ItemResult::Done,
            Ok(DecreaseOutcome::Duplicate) => {
                debug!(order_id = %event.order_id, index, "Line item already settled");
                return ItemResult::Done;
            }
            Err(e) if e.is_transient() && !final_attempt => {
                warn!(order_id = %event.order_id, product_id = %item.product_id, error = %e, "Stock update failed transiently");
                return ItemResult::Retry;
            }
            Err(e) => e,
        };

        warn!(order_id = %event.order_id, product_id = %item.product_id, quantity = item.quantity, error = %e, "Dead-lettering line item");
        let reason = if e.is_transient() { DeadLetterReason::Exhausted } else { DeadLetterReason::Rejected };
        let letter = DeadLetter::for_item(event, item, e.to_string(), attempt);
        if let Err(dl) = self.dead_letters.dead_letter(&letter).await {
            if !final_attempt {
                error!(order_id = %event.order_id, error = %dl, "Dead-letter publish failed");
                return ItemResult::Retry;
            }
            error!(order_id = %event.order_id, letter = ?letter, error = %dl, "Dropping line item, dead-letter publish failed");
            return ItemResult::Skipped;
        }
        metrics::observe_dead_letter(reason);

        match self.retrying(&key, || self.inventory.settle_line(&item.product_id, item.quantity, &key)).await {
            Ok(()) => ItemResult::Skipped,
            Err(settle) if !final_attempt => {
                // The item may be dead-lettered again on redelivery.
                error!(order_id = %event.order_id, key = %key, error = %settle, "Failed to settle dead-lettered line item");
                ItemResult::Retry
            }
            Err(settle) => {
                error!(order_id = %event.order_id, key = %key, error = %settle, "Dead-lettered line item left unsettled");
                ItemResult::Skipped
            }
        }
    }

    /// Runs `op`, retrying transient failures up to `retry_attempts` times.
    async fn retrying<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut tries = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && tries < self.settings.retry_attempts => {
                    let delay = self.settings.backoff(tries);
                    tries += 1;
                    debug!(key = %key, tries, ?delay, error = %e, "Retrying stock update");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

fn log_settle(result: Result<(), QueueError>) {
    if let Err(e) = result {
        error!(error = %e, "Failed to settle order event with the queue");
    }
}
