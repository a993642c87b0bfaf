//! Order-to-stock pipeline over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use storefront::domain::aggregates::ProductUpdate;
use storefront::infrastructure::memory::{InMemoryCache, InMemoryDeadLetters, InMemoryQueue, InMemoryStore};
use storefront::ports::store::DocumentStore;
use storefront::{
    CacheAside, Category, ConsumerSettings, Disposition, InventoryService, NewOrder, NewProduct, Order, OrderItem,
    OrderService, Product, ServiceError, StockConsumer,
};

struct Pipeline {
    products: Arc<InMemoryStore<Product>>,
    orders: Arc<InMemoryStore<Order>>,
    product_cache: Arc<InMemoryCache>,
    queue: InMemoryQueue,
    dead_letters: Arc<InMemoryDeadLetters>,
    order_service: OrderService,
    inventory: Arc<InventoryService>,
    consumer: StockConsumer,
}

fn pipeline() -> Pipeline {
    let products = Arc::new(InMemoryStore::new());
    let orders = Arc::new(InMemoryStore::new());
    let product_cache = Arc::new(InMemoryCache::new(Duration::from_secs(300)));
    let order_cache = Arc::new(InMemoryCache::new(Duration::from_secs(300)));
    let queue = InMemoryQueue::new();
    let dead_letters = Arc::new(InMemoryDeadLetters::new());

    let order_service =
        OrderService::new(orders.clone(), CacheAside::new(order_cache, true), Arc::new(queue.clone()));
    let inventory = Arc::new(InventoryService::new(products.clone(), CacheAside::new(product_cache.clone(), true)));
    let settings = ConsumerSettings { max_deliver: 3, retry_attempts: 1, retry_backoff: Duration::ZERO };
    let consumer = StockConsumer::new(inventory.clone(), dead_letters.clone(), settings);

    Pipeline { products, orders, product_cache, queue, dead_letters, order_service, inventory, consumer }
}

impl Pipeline {
    async fn product(&self, name: &str, stock: u32) -> Product {
        self.inventory
            .create_product(NewProduct {
                name: name.into(),
                category: Category { id: "C1".into(), name: "Books".into() },
                price: Decimal::new(1500, 2),
                stock,
                description: String::new(),
            })
            .await
            .unwrap()
    }

    async fn order(&self, items: &[(&str, u32)]) -> Order {
        self.order_service
            .create_order(NewOrder {
                user_id: "U1".into(),
                items: items.iter().map(|(id, q)| OrderItem { product_id: id.to_string(), quantity: *q }).collect(),
                total_price: Decimal::new(3000, 2),
            })
            .await
            .unwrap()
    }

    /// Hands every waiting message to the consumer.
    async fn drain(&self) -> Vec<Disposition> {
        let mut subscription = self.queue.subscribe();
        let mut dispositions = Vec::new();
        while let Some(delivery) = subscription.try_next() {
            dispositions.push(self.consumer.handle(delivery).await);
        }
        dispositions
    }

    async fn stored_stock(&self, id: &str) -> u32 {
        self.products.peek(id).await.unwrap().stock
    }
}

#[tokio::test]
async fn order_decrements_stock_end_to_end() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;

    let order = p.order(&[(&product.id, 2)]).await;
    assert!(p.orders.peek(&order.id).await.is_some());
    assert_eq!(p.queue.len(), 1);

    assert_eq!(p.drain().await, vec![Disposition::Acked]);
    assert_eq!(p.stored_stock(&product.id).await, 3);
    assert!(p.dead_letters.letters().is_empty());
}

#[tokio::test]
async fn redelivered_event_decrements_once() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;
    p.order(&[(&product.id, 2)]).await;

    // The first delivery is processed, but the consumer "crashes" before the
    // ack reaches the broker and the message comes back.
    let delivery = p.queue.subscribe().try_next().unwrap();
    let payload = delivery.payload.clone();
    p.consumer.handle(delivery).await;
    p.queue.push_raw(payload);

    p.drain().await;
    assert_eq!(p.stored_stock(&product.id).await, 3);
}

#[tokio::test]
async fn insufficient_stock_is_dead_lettered_and_stock_untouched() {
    let p = pipeline();
    let scarce = p.product("Dune", 1).await;
    let plenty = p.product("Emma", 10).await;
    let order = p.order(&[(&scarce.id, 2), (&plenty.id, 3)]).await;

    assert_eq!(p.drain().await, vec![Disposition::Acked]);
    assert_eq!(p.stored_stock(&scarce.id).await, 1);
    assert_eq!(p.stored_stock(&plenty.id).await, 7);

    let letters = p.dead_letters.letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].order_id.as_deref(), Some(order.id.as_str()));
    assert_eq!(letters[0].quantity, Some(2));
}

#[tokio::test]
async fn store_outage_redelivers_until_it_recovers() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;
    p.order(&[(&product.id, 2)]).await;

    p.products.set_unavailable(true);
    let delivery = p.queue.subscribe().try_next().unwrap();
    assert_eq!(p.consumer.handle(delivery).await, Disposition::Retried);

    p.products.set_unavailable(false);
    assert_eq!(p.drain().await, vec![Disposition::Acked]);
    assert_eq!(p.stored_stock(&product.id).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_decrements_do_not_overdraw() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let inventory = p.inventory.clone();
            let id = product.id.clone();
            tokio::spawn(async move { inventory.decrease_stock(&id, 3).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(ServiceError::InsufficientStock { available: 2, requested: 3, .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((succeeded, insufficient), (1, 1));
    assert_eq!(p.stored_stock(&product.id).await, 2);
}

#[tokio::test]
async fn cached_read_survives_store_outage() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;

    p.inventory.get_product(&product.id).await.unwrap();
    p.products.set_unavailable(true);

    let cached = p.inventory.get_product(&product.id).await.unwrap();
    assert_eq!(cached.stock, 5);
    assert!(matches!(p.inventory.list_products().await, Err(ServiceError::Store(_))));
}

#[tokio::test]
async fn every_write_invalidates_entity_and_collection_keys() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;
    let entity_key = format!("product:{}", product.id);

    let warm = |p: &Pipeline| {
        let inventory = p.inventory.clone();
        let id = product.id.clone();
        async move {
            inventory.get_product(&id).await.unwrap();
            inventory.list_products().await.unwrap();
        }
    };

    warm(&p).await;
    assert!(p.product_cache.contains(&entity_key).await);
    assert!(p.product_cache.contains("all_products").await);

    p.order(&[(&product.id, 1)]).await;
    p.drain().await;
    assert!(!p.product_cache.contains(&entity_key).await);
    assert!(!p.product_cache.contains("all_products").await);

    warm(&p).await;
    let update = ProductUpdate {
        name: "Dune Messiah".into(),
        category: product.category.clone(),
        price: product.price,
        stock: 4,
        description: String::new(),
    };
    p.inventory.update_product(&product.id, update).await.unwrap();
    assert!(!p.product_cache.contains(&entity_key).await);
    assert!(!p.product_cache.contains("all_products").await);

    warm(&p).await;
    p.inventory.delete_product(&product.id).await.unwrap();
    assert!(!p.product_cache.contains(&entity_key).await);
    assert!(matches!(p.inventory.get_product(&product.id).await, Err(ServiceError::NotFound { .. })));
    assert!(p.products.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn consumer_run_drains_queue_and_stops_on_shutdown() {
    let p = pipeline();
    let product = p.product("Dune", 5).await;
    p.order(&[(&product.id, 1)]).await;
    p.order(&[(&product.id, 1)]).await;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut source = p.queue.subscribe();
    let run = p.consumer.run(&mut source, async move {
        let _ = stop_rx.await;
    });

    let stopper = async {
        while !p.queue.is_empty() || p.queue.settlements().acked < 2 {
            tokio::task::yield_now().await;
        }
        let _ = stop_tx.send(());
    };
    tokio::join!(run, stopper);

    assert_eq!(p.stored_stock(&product.id).await, 3);
}

#[tokio::test]
async fn creating_a_product_invalidates_the_catalog() {
    let p = pipeline();
    p.product("Dune", 5).await;
    assert_eq!(p.inventory.list_products().await.unwrap().len(), 1);
    assert!(p.product_cache.contains("all_products").await);

    let emma = p.product("Emma", 2).await;
    assert!(!p.product_cache.contains("all_products").await);
    assert!(!p.product_cache.contains(&format!("product:{}", emma.id)).await);
    assert_eq!(p.inventory.list_products().await.unwrap().len(), 2);
}

#[tokio::test]
async fn restock_after_dead_letter_does_not_revive_the_line() {
    let p = pipeline();
    let scarce = p.product("Dune", 1).await;
    let flaky = p.product("Emma", 4).await;
    p.order(&[(&scarce.id, 3), (&flaky.id, 1)]).await;

    // The first try and the single in-process retry both fail.
    p.products.fail_decrements(&flaky.id, 2).await;
    let delivery = p.queue.subscribe().try_next().unwrap();
    assert_eq!(p.consumer.handle(delivery).await, Disposition::Retried);

    p.inventory.set_stock(&scarce.id, 5).await.unwrap();
    assert_eq!(p.drain().await, vec![Disposition::Acked]);
    assert_eq!(p.stored_stock(&scarce.id).await, 5);
    assert_eq!(p.stored_stock(&flaky.id).await, 3);
    assert_eq!(p.dead_letters.letters().len(), 1);
}
