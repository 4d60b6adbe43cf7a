use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use masonerp_core::{Aggregate, AggregateRoot, AggregateId, DomainError, TenantId};
use masonerp_events::Event;

use crate::error::LedgerError;

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountKind {
    /// Whether the account normally carries a credit balance.
    pub fn is_credit_normal(self) -> bool {
        matches!(self, AccountKind::Liability | AccountKind::Equity | AccountKind::Income)
    }
}

/// Account identifier + metadata, embedded in journal lines as a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub code: String, // e.g. "1000"
    pub name: String, // e.g. "Cash"
    pub kind: AccountKind,
}

/// Chart entry: the account plus its position in the tree and its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    /// Parent account code, if any (accounts form a tree).
    pub parent: Option<String>,
    pub active: bool,
}

/// Chart of accounts identifier (aggregate id, one chart per tenant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartOfAccountsId(pub AggregateId);

impl ChartOfAccountsId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ChartOfAccountsId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: ChartOfAccounts.
///
/// Account codes are unique within the chart. An account's kind is immutable:
/// there is deliberately no update command, only register + deactivate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOfAccounts {
    id: ChartOfAccountsId,
    tenant_id: Option<TenantId>,
    accounts: BTreeMap<String, AccountRecord>,
    version: u64,
    created: bool,
}

impl ChartOfAccounts {
    /// Empty aggregate for rehydration.
    pub fn empty(id: ChartOfAccountsId) -> Self {
        Self {
            id,
            tenant_id: None,
            accounts: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ChartOfAccountsId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn account(&self, code: &str) -> Option<&AccountRecord> {
        self.accounts.get(code)
    }

    /// All accounts in code order.
    pub fn accounts(&self) -> impl Iterator<Item = &AccountRecord> {
        self.accounts.values()
    }

    pub fn active_accounts(&self) -> impl Iterator<Item = &AccountRecord> {
        self.accounts.values().filter(|r| r.active)
    }
}

impl AggregateRoot for ChartOfAccounts {
    type Id = ChartOfAccountsId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccount {
    pub tenant_id: TenantId,
    pub chart_id: ChartOfAccountsId,
    pub account: Account,
    pub parent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateAccount {
    pub tenant_id: TenantId,
    pub chart_id: ChartOfAccountsId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartCommand {
    RegisterAccount(RegisterAccount),
    DeactivateAccount(DeactivateAccount),
}

/// Event: AccountRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistered {
    pub tenant_id: TenantId,
    pub chart_id: ChartOfAccountsId,
    pub account: Account,
    pub parent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeactivated {
    pub tenant_id: TenantId,
    pub chart_id: ChartOfAccountsId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartEvent {
    AccountRegistered(AccountRegistered),
    AccountDeactivated(AccountDeactivated),
}

impl Event for ChartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChartEvent::AccountRegistered(_) => "accounting.chart.account_registered",
            ChartEvent::AccountDeactivated(_) => "accounting.chart.account_deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ChartEvent::AccountRegistered(e) => e.occurred_at,
            ChartEvent::AccountDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ChartOfAccounts {
    type Command = ChartCommand;
    type Event = ChartEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ChartEvent::AccountRegistered(e) => {
                self.id = e.chart_id;
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                    self.created = true;
                }
                self.accounts.insert(
                    e.account.code.clone(),
                    AccountRecord {
                        account: e.account.clone(),
                        parent: e.parent.clone(),
                        active: true,
                    },
                );
            }
            ChartEvent::AccountDeactivated(e) => {
                if let Some(record) = self.accounts.get_mut(&e.code) {
                    record.active = false;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ChartCommand::RegisterAccount(cmd) => self.handle_register(cmd),
            ChartCommand::DeactivateAccount(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl ChartOfAccounts {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterAccount) -> Result<Vec<ChartEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;

        if cmd.account.code.trim().is_empty() {
            return Err(DomainError::validation("account code cannot be empty").into());
        }
        if cmd.account.name.trim().is_empty() {
            return Err(DomainError::validation("account name cannot be empty").into());
        }
        if self.accounts.contains_key(&cmd.account.code) {
            return Err(DomainError::conflict(format!(
                "account code '{}' already registered",
                cmd.account.code
            ))
            .into());
        }
        if let Some(parent) = &cmd.parent {
            if !self.accounts.contains_key(parent) {
                return Err(DomainError::validation(format!(
                    "parent account '{parent}' does not exist"
                ))
                .into());
            }
        }

        Ok(vec![ChartEvent::AccountRegistered(AccountRegistered {
            tenant_id: cmd.tenant_id,
            chart_id: cmd.chart_id,
            account: cmd.account.clone(),
            parent: cmd.parent.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateAccount) -> Result<Vec<ChartEvent>, LedgerError> {
        if !self.created {
            return Err(DomainError::not_found().into());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        let record = self
            .accounts
            .get(&cmd.code)
            .ok_or_else(DomainError::not_found)?;
        if !record.active {
            return Err(DomainError::conflict("account already inactive").into());
        }

        Ok(vec![ChartEvent::AccountDeactivated(AccountDeactivated {
            tenant_id: cmd.tenant_id,
            chart_id: cmd.chart_id,
            code: cmd.code.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
