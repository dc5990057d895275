//! Append-only event store boundary.
//!
//! Streams are keyed by `(instance_id, aggregate_id)`; no storage technology
//! is assumed.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
