//! Observability: tracing/logging initialization for processes embedding the
//! ledger and inventory cores.

pub mod tracing;

pub use tracing::init;
