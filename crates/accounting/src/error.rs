use thiserror::Error;

use masonerp_core::DomainError;

/// Ledger-specific failures.
///
/// General validation/conflict/not-found failures travel as [`DomainError`]
/// through the transparent variant; the named variants are the ones callers
/// branch on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A line must carry exactly one of debit or credit.
    #[error("line must have exactly one of debit or credit (debit={debit}, credit={credit})")]
    UnbalancedLine { debit: i64, credit: i64 },

    /// Entry totals do not balance at posting time.
    #[error("unbalanced entry: total debit {total_debit} != total credit {total_credit}")]
    UnbalancedEntry { total_debit: i128, total_credit: i128 },

    /// The entry has been posted and is immutable.
    #[error("entry is posted and immutable")]
    AlreadyPosted,

    #[error(transparent)]
    Domain(#[from] DomainError),
}
