//! Append-only, tenant-scoped event storage.

mod in_memory;
#[path = "trait.rs"]
mod store_trait;

pub use in_memory::InMemoryEventStore;
pub use store_trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
