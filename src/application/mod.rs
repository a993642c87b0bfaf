//! Application services
//!
//! Use cases for each service. Services own no infrastructure; every port
//! is injected at construction.

mod cache_aside;
mod inventory;
mod orders;
mod stock_consumer;
mod users;

pub use cache_aside::CacheAside;
pub use inventory::{DecreaseOutcome, InventoryService};
pub use orders::OrderService;
pub use stock_consumer::{ConsumerSettings, Disposition, StockConsumer};
pub use users::UserService;
