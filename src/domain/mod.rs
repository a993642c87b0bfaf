//! Domain entities, their invariants, and the events exchanged between services.

pub mod aggregates;
pub mod events;
