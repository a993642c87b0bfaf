//! Storefront - order, inventory and user services

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_nats::jetstream;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront::api::{self, Services};
use storefront::config::{BrokerBackend, Config, ServiceKind, StoreBackend};
use storefront::domain::aggregates::{Order, Product, User};
use storefront::infrastructure::memory::{InMemoryCache, InMemoryDeadLetters, InMemoryQueue, InMemoryStore};
use storefront::infrastructure::nats::{NatsKvCache, NatsOrderQueue};
use storefront::infrastructure::{LogNotifier, PgDocumentStore};
use storefront::ports::cache::Cache;
use storefront::ports::queue::{DeadLetterSink, MessageSource, OrderEventPublisher};
use storefront::ports::store::{Document, DocumentStore, ProductStore};
use storefront::{CacheAside, ConsumerSettings, InventoryService, OrderService, StockConsumer, UserService};

struct Backends {
    config: Config,
    pool: Option<PgPool>,
    jetstream: Option<jetstream::Context>,
}

enum OrderQueue {
    Memory(InMemoryQueue),
    Nats(NatsOrderQueue),
}

impl OrderQueue {
    fn publisher(&self) -> Arc<dyn OrderEventPublisher> {
        match self {
            Self::Memory(queue) => Arc::new(queue.clone()),
            Self::Nats(queue) => Arc::new(queue.clone()),
        }
    }

    async fn consumer_side(&self, config: &Config) -> Result<(Box<dyn MessageSource>, Arc<dyn DeadLetterSink>)> {
        let source: Box<dyn MessageSource>;
        let dead_letters: Arc<dyn DeadLetterSink>;
        match self {
            Self::Memory(queue) => {
                source = Box::new(queue.subscribe());
                dead_letters = Arc::new(InMemoryDeadLetters::new());
            }
            Self::Nats(queue) => {
                source = Box::new(queue.subscribe(&config.consumer_name, config.consumer_max_deliver).await?);
                dead_letters = Arc::new(queue.dead_letters());
            }
        }
        Ok((source, dead_letters))
    }
}

impl Backends {
    async fn connect(config: Config) -> Result<Self> {
        let pool = match (&config.store_backend, &config.database_url) {
            (StoreBackend::Postgres, Some(url)) => {
                let db = PgPoolOptions::new().max_connections(10).connect(url).await.context("connecting to Postgres")?;
                sqlx::migrate!("./migrations").run(&db).await?;
                Some(db)
            }
            _ => None,
        };

        let jetstream = match (&config.nats_url, config.uses_nats()) {
            (Some(url), true) => {
                let client = async_nats::connect(url).await.context("connecting to NATS")?;
                Some(jetstream::new(client))
            }
            _ => None,
        };

        Ok(Self { config, pool, jetstream })
    }

    fn nats(&self) -> Result<&jetstream::Context> {
        self.jetstream.as_ref().context("NATS backend selected but not connected")
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().context("Postgres backend selected but not connected")
    }

    fn store<D: Document>(&self) -> Result<Arc<dyn DocumentStore<D>>> {
        let store: Arc<dyn DocumentStore<D>> = match self.config.store_backend {
            StoreBackend::Postgres => Arc::new(PgDocumentStore::<D>::new(self.pool()?.clone())),
            StoreBackend::Memory => Arc::new(InMemoryStore::<D>::new()),
        };
        Ok(store)
    }

    fn product_store(&self) -> Result<Arc<dyn ProductStore>> {
        let store: Arc<dyn ProductStore> = match self.config.store_backend {
            StoreBackend::Postgres => Arc::new(PgDocumentStore::<Product>::new(self.pool()?.clone())),
            StoreBackend::Memory => Arc::new(InMemoryStore::<Product>::new()),
        };
        Ok(store)
    }

    async fn cache(&self, bucket: &str) -> Result<CacheAside> {
        let ttl = self.config.cache_ttl();
        let cache: Arc<dyn Cache> = match self.config.cache_backend {
            BrokerBackend::Nats => Arc::new(NatsKvCache::open(self.nats()?, bucket, ttl).await?),
            BrokerBackend::Memory => Arc::new(InMemoryCache::new(ttl)),
        };
        Ok(CacheAside::new(cache, self.config.cache_populate_lock))
    }

    async fn order_queue(&self) -> Result<OrderQueue> {
        Ok(match self.config.queue_backend {
            BrokerBackend::Nats => OrderQueue::Nats(
                NatsOrderQueue::new(self.nats()?.clone(), &self.config.order_queue, &self.config.dead_letter_queue).await?,
            ),
            BrokerBackend::Memory => OrderQueue::Memory(InMemoryQueue::new()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(services = ?config.services, store = ?config.store_backend, cache = ?config.cache_backend, queue = ?config.queue_backend, "Starting storefront");

    let backends = Backends::connect(config.clone()).await?;
    let queue = backends.order_queue().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut services = Services::default();
    let mut background = Vec::new();

    if config.runs(ServiceKind::Orders) {
        let service = OrderService::new(backends.store::<Order>()?, backends.cache("orders_cache").await?, queue.publisher());
        services.orders = Some(Arc::new(service));
    }

    if config.runs(ServiceKind::Inventory) {
        let inventory = Arc::new(InventoryService::new(backends.product_store()?, backends.cache("inventory_cache").await?));
        let (mut source, dead_letters) = queue.consumer_side(&config).await?;
        let consumer = StockConsumer::new(Arc::clone(&inventory), dead_letters, ConsumerSettings::from(&config));
        let mut stop = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            consumer
                .run(source.as_mut(), async move {
                    let _ = stop.changed().await;
                })
                .await;
        }));
        background.push(tokio::spawn(prune_settled_keys(
            Arc::clone(&inventory),
            config.settled_key_retention(),
            shutdown_rx.clone(),
        )));
        services.inventory = Some(inventory);
    }

    if config.runs(ServiceKind::Users) {
        let service = UserService::new(backends.store::<User>()?, backends.cache("users_cache").await?, Arc::new(LogNotifier));
        services.users = Some(Arc::new(service));
    }

    let app = api::router(&services);
    let addr = config.listen_addr();
    tracing::info!("🚀 Storefront listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for task in background {
        task.await?;
    }
    tracing::info!("Storefront stopped");
    Ok(())
}

/// Drops settled stock keys older than `retention`, hourly, until shutdown.
async fn prune_settled_keys(inventory: Arc<InventoryService>, retention: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticks = tokio::time::interval(Duration::from_secs(3600));
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(e) = inventory.prune_settled_keys(retention).await {
                    tracing::warn!(error = %e, "Pruning settled stock keys failed");
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("ctrl_c signal received"),
        () = terminate => tracing::info!("terminate signal received"),
    }
}
