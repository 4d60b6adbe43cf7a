use thiserror::Error;

use masonerp_core::DomainError;

use crate::stock::CostingMethod;

/// Stock-ledger-specific failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// An issue request exceeds what the group's lots can supply.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Two lots in the group carry the same sequence number.
    ///
    /// This can only happen when concurrent receipts were not serialized by
    /// the store; the receipt that observes it should be retried against a
    /// repaired stream.
    #[error("duplicate {method} sequence {sequence} in stock group")]
    DuplicateSequence { method: CostingMethod, sequence: u32 },

    #[error(transparent)]
    Domain(#[from] DomainError),
}
