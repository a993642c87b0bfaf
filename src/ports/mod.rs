//! Boundaries between the use cases and their infrastructure.
//!
//! Every service receives its store, cache and queue handles as trait
//! objects at construction time, so tests and in-memory deployments swap
//! them freely.

pub mod cache;
pub mod notify;
pub mod queue;
pub mod store;
