//! Accounting module (double-entry ledger, event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod budget;
pub mod error;
pub mod journal;
pub mod statement;

pub use account::{
    Account, AccountDeactivated, AccountKind, AccountRecord, AccountRegistered, ChartCommand,
    ChartEvent, ChartOfAccounts, ChartOfAccountsId, DeactivateAccount, RegisterAccount,
};
pub use budget::{Budget, BudgetKind, BudgetLine};
pub use error::LedgerError;
pub use journal::{
    AddLine, EntryOpened, EntryPosted, EntrySide, JournalCommand, JournalEntry, JournalEntryId,
    JournalEvent, JournalLine, LineAdded, LineInput, LineRemoved, OpenEntry, PostEntry, RemoveLine,
};
pub use statement::{
    PostedLine, Statement, StatementKind, StatementLine, StatementPeriod, balance_sheet,
    profit_and_loss, trial_balance,
};
