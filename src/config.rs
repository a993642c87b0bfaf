//! Service configuration from the command line and environment.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] clap::Error),

    #[error("{0} is required by the selected backends")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Backend for the cache and the order queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerBackend {
    Nats,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ServiceKind {
    Orders,
    Inventory,
    Users,
}

/// Storefront server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "storefront", about = "Order, inventory and user services", long_about = None)]
pub struct Config {
    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8083)]
    pub port: u16,

    /// Services hosted by this process
    #[arg(long, env = "SERVICES", value_enum, value_delimiter = ',', default_value = "orders,inventory,users")]
    pub services: Vec<ServiceKind>,

    /// `PostgreSQL` connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// NATS server address
    #[arg(long, env = "NATS_URL")]
    pub nats_url: Option<String>,

    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "postgres")]
    pub store_backend: StoreBackend,

    #[arg(long, env = "CACHE_BACKEND", value_enum, default_value = "nats")]
    pub cache_backend: BrokerBackend,

    #[arg(long, env = "QUEUE_BACKEND", value_enum, default_value = "nats")]
    pub queue_backend: BrokerBackend,

    /// Lifetime of every cache entry, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Serialize cache population and invalidation per key
    #[arg(long, env = "CACHE_POPULATE_LOCK", default_value_t = true, action = clap::ArgAction::Set)]
    pub cache_populate_lock: bool,

    #[arg(long, env = "ORDER_QUEUE", default_value = "order_created")]
    pub order_queue: String,

    #[arg(long, env = "ORDER_DEAD_LETTER_QUEUE", default_value = "order_created_dead_letter")]
    pub dead_letter_queue: String,

    /// Durable consumer name on the order queue
    #[arg(long, env = "CONSUMER_NAME", default_value = "inventory")]
    pub consumer_name: String,

    /// Delivery attempts before transient failures are dead-lettered
    #[arg(long, env = "CONSUMER_MAX_DELIVER", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub consumer_max_deliver: u32,

    /// In-process retries per line item
    #[arg(long, env = "CONSUMER_RETRY_ATTEMPTS", default_value_t = 3)]
    pub consumer_retry_attempts: u32,

    #[arg(long, env = "CONSUMER_RETRY_BACKOFF_MS", default_value_t = 100)]
    pub consumer_retry_backoff_ms: u64,

    /// How long settled line-item keys are kept, in seconds. Must outlast the
    /// queue's redelivery window.
    #[arg(long, env = "SETTLED_KEY_RETENTION_SECS", default_value_t = 7 * 24 * 3600)]
    pub settled_key_retention_secs: u64,
}

impl Config {
    /// Loads `.env` if present, then parses arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        _ = dotenvy::dotenv();
        Self::try_parse()?.validated()
    }

    /// Rejects backend selections whose connection settings are absent.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.uses_nats() && self.nats_url.is_none() {
            return Err(ConfigError::Missing("NATS_URL"));
        }
        Ok(self)
    }

    pub fn uses_nats(&self) -> bool {
        self.cache_backend == BrokerBackend::Nats || self.queue_backend == BrokerBackend::Nats
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn runs(&self, service: ServiceKind) -> bool {
        self.services.contains(&service)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn consumer_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.consumer_retry_backoff_ms)
    }

    pub fn settled_key_retention(&self) -> Duration {
        Duration::from_secs(self.settled_key_retention_secs)
    }
}
