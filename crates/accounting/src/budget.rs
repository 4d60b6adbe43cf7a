//! Budget monitoring: per-account budget lines with derived variance and
//! utilization metrics. Read-side value types; actuals are filled from
//! posted journal lines.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use masonerp_core::ProjectId;

use crate::account::Account;
use crate::statement::PostedLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetKind {
    Annual,
    Project,
    Department,
    Monthly,
}

/// One budgeted account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub account: Account,
    /// Budgeted amount in smallest currency unit.
    pub budget_amount: i64,
    /// Actual spend to date (net debits against the account).
    pub actual_amount: i64,
    /// Committed but not yet actualized (e.g. open purchase orders).
    pub committed_amount: i64,
}

impl BudgetLine {
    pub fn variance(&self) -> i64 {
        self.budget_amount - self.actual_amount
    }

    pub fn variance_percent(&self) -> f64 {
        if self.budget_amount > 0 {
            self.variance() as f64 * 100.0 / self.budget_amount as f64
        } else {
            0.0
        }
    }

    /// Budget still available after actuals and commitments.
    pub fn available(&self) -> i64 {
        self.budget_amount - self.actual_amount - self.committed_amount
    }
}

/// A budget with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub name: String,
    pub kind: BudgetKind,
    /// E.g. "2025-26".
    pub financial_year: String,
    pub project: Option<ProjectId>,
    pub lines: Vec<BudgetLine>,
}

impl Budget {
    pub fn total_budget(&self) -> i128 {
        self.lines.iter().map(|l| l.budget_amount as i128).sum()
    }

    pub fn total_actual(&self) -> i128 {
        self.lines.iter().map(|l| l.actual_amount as i128).sum()
    }

    pub fn total_variance(&self) -> i128 {
        self.total_budget() - self.total_actual()
    }

    pub fn utilization_percent(&self) -> f64 {
        let budget = self.total_budget();
        if budget > 0 {
            self.total_actual() as f64 * 100.0 / budget as f64
        } else {
            0.0
        }
    }

    /// Fill `actual_amount` on every line from posted journal activity within
    /// the period, matched by account code (and the budget's project, if set).
    pub fn refresh_actuals(&mut self, posted: &[PostedLine], start: NaiveDate, end: NaiveDate) {
        for line in &mut self.lines {
            let net: i128 = posted
                .iter()
                .filter(|p| {
                    p.entry_date >= start
                        && p.entry_date <= end
                        && p.account.code == line.account.code
                        && (self.project.is_none() || p.project == self.project)
                })
                .map(|p| p.debit_amount() as i128 - p.credit_amount() as i128)
                .sum();
            line.actual_amount = net.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKind;
    use crate::journal::EntrySide;
    use crate::journal::JournalEntryId;
    use masonerp_core::AggregateId;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn account(code: &str, kind: AccountKind) -> Account {
        Account {
            code: code.to_string(),
            name: code.to_string(),
            kind,
        }
    }

    fn budget_line(code: &str, budget: i64) -> BudgetLine {
        BudgetLine {
            account: account(code, AccountKind::Expense),
            budget_amount: budget,
            actual_amount: 0,
            committed_amount: 0,
        }
    }

    fn posted(code: &str, side: EntrySide, amount: i64, date: NaiveDate) -> PostedLine {
        PostedLine {
            entry_id: JournalEntryId::new(AggregateId::new()),
            entry_number: "JE".to_string(),
            entry_date: date,
            project: None,
            account: account(code, AccountKind::Expense),
            side,
            amount,
        }
    }

    #[test]
    fn variance_and_available() {
        let line = BudgetLine {
            account: account("5100", AccountKind::Expense),
            budget_amount: 100_000,
            actual_amount: 60_000,
            committed_amount: 15_000,
        };
        assert_eq!(line.variance(), 40_000);
        assert_eq!(line.variance_percent(), 40.0);
        assert_eq!(line.available(), 25_000);
    }

    #[test]
    fn zero_budget_has_zero_variance_percent() {
        let line = budget_line("5100", 0);
        assert_eq!(line.variance_percent(), 0.0);
    }

    #[test]
    fn refresh_actuals_sums_net_debits_within_period() {
        let mut budget = Budget {
            name: "Site materials".to_string(),
            kind: BudgetKind::Annual,
            financial_year: "2025-26".to_string(),
            project: None,
            lines: vec![budget_line("5100", 100_000), budget_line("5200", 50_000)],
        };

        let posted = vec![
            posted("5100", EntrySide::Debit, 30_000, d(2025, 4, 10)),
            posted("5100", EntrySide::Credit, 5_000, d(2025, 5, 2)), // purchase return
            posted("5100", EntrySide::Debit, 9_999, d(2026, 4, 1)),  // outside period
            posted("5200", EntrySide::Debit, 50_000, d(2025, 6, 1)),
        ];

        budget.refresh_actuals(&posted, d(2025, 4, 1), d(2026, 3, 31));

        assert_eq!(budget.lines[0].actual_amount, 25_000);
        assert_eq!(budget.lines[1].actual_amount, 50_000);
        assert_eq!(budget.total_variance(), 75_000);
        assert_eq!(budget.utilization_percent(), 50.0);
    }
}
