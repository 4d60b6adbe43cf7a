//! Financial statement derivation.
//!
//! Statements are pure aggregations over posted journal lines. They never
//! fail: an inconsistent ledger yields a best-effort snapshot, and callers
//! cross-check invariants (`is_balanced`, `identity_gap`) to flag data
//! quality problems instead of treating them as hard errors.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use masonerp_core::ProjectId;

use crate::account::{Account, AccountKind};
use crate::journal::{EntryPosted, EntrySide, JournalEntryId};

/// One posted journal line, flattened with its entry context.
///
/// This is the row shape read models store and statement builders consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLine {
    pub entry_id: JournalEntryId,
    pub entry_number: String,
    pub entry_date: NaiveDate,
    pub project: Option<ProjectId>,
    pub account: Account,
    pub side: EntrySide,
    /// Positive amount in smallest currency unit.
    pub amount: i64,
}

impl PostedLine {
    /// Flatten a posted entry into statement rows.
    pub fn from_entry(event: &EntryPosted) -> Vec<PostedLine> {
        event
            .lines
            .iter()
            .map(|line| PostedLine {
                entry_id: event.entry_id,
                entry_number: event.entry_number.clone(),
                entry_date: event.entry_date,
                project: event.project,
                account: line.account.clone(),
                side: line.side,
                amount: line.amount,
            })
            .collect()
    }

    pub fn debit_amount(&self) -> i64 {
        match self.side {
            EntrySide::Debit => self.amount,
            EntrySide::Credit => 0,
        }
    }

    pub fn credit_amount(&self) -> i64 {
        match self.side {
            EntrySide::Debit => 0,
            EntrySide::Credit => self.amount,
        }
    }
}

/// Which statement a [`Statement`] snapshot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    TrialBalance,
    ProfitAndLoss,
    BalanceSheet,
}

/// Reporting period of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementPeriod {
    /// Point-in-time snapshot (trial balance, balance sheet).
    AsOf(NaiveDate),
    /// Date range (profit & loss).
    Range { start: NaiveDate, end: NaiveDate },
}

/// Per-account row of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub account: Account,
    pub debit: i128,
    pub credit: i128,
}

impl StatementLine {
    /// Signed balance (debit positive).
    pub fn net(&self) -> i128 {
        self.debit - self.credit
    }
}

/// A derived financial statement: one shape, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub period: StatementPeriod,
    pub project: Option<ProjectId>,
    /// Per-account rows in account-code order.
    pub lines: Vec<StatementLine>,
    pub total_debit: i128,
    pub total_credit: i128,
}

impl Statement {
    /// Trial balance correctness invariant. A `false` here means the
    /// underlying posting set is inconsistent.
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }

    fn kind_net(&self, kind: AccountKind) -> i128 {
        let net: i128 = self
            .lines
            .iter()
            .filter(|l| l.account.kind == kind)
            .map(StatementLine::net)
            .sum();
        if kind.is_credit_normal() { -net } else { net }
    }

    pub fn total_income(&self) -> i128 {
        self.kind_net(AccountKind::Income)
    }

    pub fn total_expenses(&self) -> i128 {
        self.kind_net(AccountKind::Expense)
    }

    pub fn net_profit(&self) -> i128 {
        self.total_income() - self.total_expenses()
    }

    pub fn total_assets(&self) -> i128 {
        self.kind_net(AccountKind::Asset)
    }

    pub fn total_liabilities(&self) -> i128 {
        self.kind_net(AccountKind::Liability)
    }

    /// Equity including retained earnings (income − expenses to date), so the
    /// accounting identity holds without a closing run.
    pub fn total_equity(&self) -> i128 {
        self.kind_net(AccountKind::Equity) + self.net_profit()
    }

    /// Residual of `assets == liabilities + equity`. Non-zero means the
    /// posting set violates double entry somewhere; surface it as a data
    /// quality alarm, not a failure.
    pub fn identity_gap(&self) -> i128 {
        self.total_assets() - self.total_liabilities() - self.total_equity()
    }
}

fn in_scope(line: &PostedLine, project: Option<ProjectId>) -> bool {
    match project {
        None => true,
        Some(p) => line.project == Some(p),
    }
}

fn accumulate<'a>(lines: impl Iterator<Item = &'a PostedLine>) -> BTreeMap<String, StatementLine> {
    let mut by_account: BTreeMap<String, StatementLine> = BTreeMap::new();
    for line in lines {
        let row = by_account
            .entry(line.account.code.clone())
            .or_insert_with(|| StatementLine {
                account: line.account.clone(),
                debit: 0,
                credit: 0,
            });
        row.debit += line.debit_amount() as i128;
        row.credit += line.credit_amount() as i128;
    }
    by_account
}

fn totals(lines: &[StatementLine]) -> (i128, i128) {
    let total_debit = lines.iter().map(|l| l.debit).sum();
    let total_credit = lines.iter().map(|l| l.credit).sum();
    (total_debit, total_credit)
}

/// Trial balance as of a date: every account netted to its natural side.
pub fn trial_balance(
    lines: &[PostedLine],
    as_of: NaiveDate,
    project: Option<ProjectId>,
) -> Statement {
    let by_account = accumulate(
        lines
            .iter()
            .filter(|l| l.entry_date <= as_of && in_scope(l, project)),
    );

    // Net each account onto the side it actually carries.
    let lines: Vec<StatementLine> = by_account
        .into_values()
        .map(|row| {
            let net = row.net();
            StatementLine {
                account: row.account,
                debit: net.max(0),
                credit: (-net).max(0),
            }
        })
        .collect();

    let (total_debit, total_credit) = totals(&lines);
    Statement {
        kind: StatementKind::TrialBalance,
        period: StatementPeriod::AsOf(as_of),
        project,
        lines,
        total_debit,
        total_credit,
    }
}

/// Profit & loss over a period: income and expense activity only.
pub fn profit_and_loss(
    lines: &[PostedLine],
    start: NaiveDate,
    end: NaiveDate,
    project: Option<ProjectId>,
) -> Statement {
    let by_account = accumulate(lines.iter().filter(|l| {
        l.entry_date >= start
            && l.entry_date <= end
            && in_scope(l, project)
            && matches!(l.account.kind, AccountKind::Income | AccountKind::Expense)
    }));

    let lines: Vec<StatementLine> = by_account.into_values().collect();
    let (total_debit, total_credit) = totals(&lines);
    Statement {
        kind: StatementKind::ProfitAndLoss,
        period: StatementPeriod::Range { start, end },
        project,
        lines,
        total_debit,
        total_credit,
    }
}

/// Balance sheet as of a date.
///
/// The snapshot keeps every account's cumulative balance; the classification
/// helpers fold income/expense nets into equity as retained earnings.
pub fn balance_sheet(
    lines: &[PostedLine],
    as_of: NaiveDate,
    project: Option<ProjectId>,
) -> Statement {
    let by_account = accumulate(
        lines
            .iter()
            .filter(|l| l.entry_date <= as_of && in_scope(l, project)),
    );

    let lines: Vec<StatementLine> = by_account.into_values().collect();
    let (total_debit, total_credit) = totals(&lines);
    Statement {
        kind: StatementKind::BalanceSheet,
        period: StatementPeriod::AsOf(as_of),
        project,
        lines,
        total_debit,
        total_credit,
    }
}
