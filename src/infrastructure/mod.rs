//! Adapters for the ports: Postgres, NATS and in-memory implementations.

pub mod memory;
pub mod nats;
pub mod notify;
pub mod postgres;

pub use notify::LogNotifier;
pub use postgres::PgDocumentStore;
