//! Read models built from the event streams (CQRS read side).
//!
//! Projections are disposable: events are the source of truth, and any read
//! model can be cleared and rebuilt by replay. Application is idempotent via
//! per-stream cursors, and tenant-isolated throughout.

mod cursors;
pub mod general_ledger;
pub mod stock_levels;

pub use general_ledger::{GeneralLedgerError, GeneralLedgerProjection, PostedEntryLines};
pub use stock_levels::{StockLevel, StockLevelsError, StockLevelsProjection};
