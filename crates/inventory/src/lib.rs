//! Inventory valuation module (stock lots, FIFO/LIFO/FEFO sequencing).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod error;
pub mod stock;

pub use error::StockError;
pub use stock::{
    CostingMethod, IssueStock, LotConsumption, LotId, LotReceived, MaterialId, ReceiveLot,
    StockCommand, StockEvent, StockIssued, StockLedger, StockLedgerId, StockLot, SupplierId,
};
