//! Domain event plumbing: event contract, envelopes, pub/sub.
//!
//! No storage and no IO here; the event store lives in the infra layer.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
