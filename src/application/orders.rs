//! Order use cases.

use std::sync::Arc;

use tracing::{error, info};

use super::CacheAside;
use crate::domain::aggregates::{NewOrder, Order, OrderUpdate};
use crate::domain::events::OrderCreatedEvent;
use crate::ports::cache::keys;
use crate::ports::queue::OrderEventPublisher;
use crate::ports::store::DocumentStore;
use crate::{Result, ServiceError};

pub struct OrderService {
    store: Arc<dyn DocumentStore<Order>>,
    cache: CacheAside,
    publisher: Arc<dyn OrderEventPublisher>,
}

impl OrderService {
    pub fn new(store: Arc<dyn DocumentStore<Order>>, cache: CacheAside, publisher: Arc<dyn OrderEventPublisher>) -> Self {
        Self { store, cache, publisher }
    }

    /// Persists the order, then publishes exactly one `order_created` event.
    ///
    /// A publish failure is reported as `PublishFailed`; the order stays
    /// stored and its id travels with the error.
    pub async fn create_order(&self, new: NewOrder) -> Result<Order> {
        let order = Order::create(new)?;
        self.store
            .insert(&order)
            .await
            .map_err(|e| ServiceError::from_store(e, "order", &order.id))?;
        self.invalidate(&order.id).await;

        let event = OrderCreatedEvent::from_order(&order);
        if let Err(source) = self.publisher.publish(&event).await {
            error!(order_id = %order.id, error = %source, "Order stored but event publish failed");
            return Err(ServiceError::PublishFailed { order_id: order.id, source });
        }

        info!(order_id = %order.id, event_id = %event.event_id, items = order.items.len(), "Order created");
        Ok(order)
    }

    pub async fn get_order(&self, id: &str) -> Result<Order> {
        self.cache
            .get_or_load(&keys::order(id), || async {
                self.store
                    .get(id)
                    .await
                    .map_err(ServiceError::Store)?
                    .ok_or_else(|| ServiceError::not_found("order", id))
            })
            .await
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        self.cache
            .get_or_load(keys::ALL_ORDERS, || async { self.store.list().await.map_err(ServiceError::Store) })
            .await
    }

    pub async fn update_order(&self, id: &str, update: OrderUpdate) -> Result<Order> {
        let mut order = self
            .store
            .get(id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("order", id))?;
        order.apply(update)?;
        self.store
            .update(&order)
            .await
            .map_err(|e| ServiceError::from_store(e, "order", id))?;
        self.invalidate(id).await;

        info!(order_id = %id, status = ?order.status, "Order updated");
        Ok(order)
    }

    pub async fn delete_order(&self, id: &str) -> Result<()> {
        if !self.store.delete(id).await.map_err(ServiceError::Store)? {
            return Err(ServiceError::not_found("order", id));
        }
        self.invalidate(id).await;

        info!(order_id = %id, "Order deleted");
        Ok(())
    }

    async fn invalidate(&self, id: &str) {
        self.cache.invalidate(&[&keys::order(id), keys::ALL_ORDERS]).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::predicate::function;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::aggregates::{OrderItem, OrderStatus};
    use crate::infrastructure::memory::{InMemoryCache, InMemoryStore};
    use crate::ports::queue::{MockOrderEventPublisher, QueueError};

    fn new_order(user_id: &str) -> NewOrder {
        NewOrder {
            user_id: user_id.into(),
            items: vec![OrderItem { product_id: "P1".into(), quantity: 2 }],
            total_price: Decimal::new(4000, 2),
        }
    }

    fn service(publisher: MockOrderEventPublisher) -> (Arc<InMemoryStore<Order>>, OrderService) {
        let store = Arc::new(InMemoryStore::new());
        let cache = CacheAside::new(Arc::new(InMemoryCache::new(Duration::from_secs(300))), true);
        let service = OrderService::new(store.clone(), cache, Arc::new(publisher));
        (store, service)
    }

    #[tokio::test]
    async fn create_publishes_one_event_for_stored_order() {
        let mut publisher = MockOrderEventPublisher::new();
        publisher
            .expect_publish()
            .with(function(|event: &OrderCreatedEvent| event.user_id == "U1" && event.items[0].quantity == 2))
            .times(1)
            .returning(|_| Ok(()));
        let (store, service) = service(publisher);

        let order = service.create_order(new_order("U1")).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(store.peek(&order.id).await, Some(order));
    }

    #[tokio::test]
    async fn invalid_order_is_neither_stored_nor_published() {
        let mut publisher = MockOrderEventPublisher::new();
        publisher.expect_publish().times(0);
        let (store, service) = service(publisher);

        let err = service.create_order(new_order("")).await.unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_keeps_order_and_reports_id() {
        let mut publisher = MockOrderEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(QueueError::Unavailable("broker down".into())));
        let (store, service) = service(publisher);

        let err = service.create_order(new_order("U1")).await.unwrap_err();

        let ServiceError::PublishFailed { order_id, .. } = err else {
            panic!("expected PublishFailed, got {err:?}");
        };
        assert!(store.peek(&order_id).await.is_some());
    }

    #[tokio::test]
    async fn get_order_is_cached_until_update() {
        let mut publisher = MockOrderEventPublisher::new();
        publisher.expect_publish().returning(|_| Ok(()));
        let (store, service) = service(publisher);
        let order = service.create_order(new_order("U1")).await.unwrap();

        service.get_order(&order.id).await.unwrap();
        let reads = store.read_count();
        store.set_unavailable(true);
        assert_eq!(service.get_order(&order.id).await.unwrap().id, order.id);
        assert_eq!(store.read_count(), reads);
        store.set_unavailable(false);

        let updated = service
            .update_order(
                &order.id,
                OrderUpdate {
                    user_id: "U1".into(),
                    items: order.items.clone(),
                    total_price: order.total_price,
                    status: Some(OrderStatus::Completed),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.created_at, order.created_at);
        assert_eq!(service.get_order(&order.id).await.unwrap().status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn missing_orders_are_not_found() {
        let (_, service) = service(MockOrderEventPublisher::new());

        assert!(matches!(service.get_order("nope").await, Err(ServiceError::NotFound { .. })));
        assert!(matches!(service.delete_order("nope").await, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_reflects_delete() {
        let mut publisher = MockOrderEventPublisher::new();
        publisher.expect_publish().returning(|_| Ok(()));
        let (_, service) = service(publisher);
        let first = service.create_order(new_order("U1")).await.unwrap();
        service.create_order(new_order("U2")).await.unwrap();

        assert_eq!(service.list_orders().await.unwrap().len(), 2);
        service.delete_order(&first.id).await.unwrap();
        assert_eq!(service.list_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_invalidates_order_list() {
        let mut publisher = MockOrderEventPublisher::new();
        publisher.expect_publish().returning(|_| Ok(()));
        let (store, service) = service(publisher);
        service.create_order(new_order("U1")).await.unwrap();
        assert_eq!(service.list_orders().await.unwrap().len(), 1);

        let reads = store.read_count();
        service.create_order(new_order("U2")).await.unwrap();
        assert_eq!(service.list_orders().await.unwrap().len(), 2);
        assert_eq!(store.read_count(), reads + 1);
    }
}
