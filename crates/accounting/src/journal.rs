use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use masonerp_core::{Aggregate, AggregateRoot, AggregateId, DomainError, ProjectId, TenantId, UserId};
use masonerp_events::Event;

use crate::account::Account;
use crate::error::LedgerError;

/// Side of a journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySide {
    Debit,
    Credit,
}

/// Raw line input as captured from a voucher: both columns present, exactly
/// one may be non-zero. Amounts in smallest currency unit (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub account: Account,
    pub description: String,
    pub debit_amount: i64,
    pub credit_amount: i64,
}

/// A validated, normalized journal line (immutable once added).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub line_no: u32,
    pub account: Account,
    pub description: String,
    /// Positive amount in smallest currency unit.
    pub amount: i64,
    pub side: EntrySide,
}

impl JournalLine {
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

    /// Signed amount (debit positive, credit negative).
    pub fn signed_amount(&self) -> i64 {
        match self.side {
            EntrySide::Debit => self.amount,
            EntrySide::Credit => -self.amount,
        }
    }
}

/// Journal entry identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalEntryId(pub AggregateId);

impl JournalEntryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for JournalEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: JournalEntry (double-entry voucher).
///
/// Lines may be added and removed while the entry is open; posting freezes it.
/// Totals are always recomputed from the lines, never stored independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    id: JournalEntryId,
    tenant_id: Option<TenantId>,
    entry_number: String,
    entry_date: NaiveDate,
    reference: String,
    description: String,
    project: Option<ProjectId>,
    created_by: Option<UserId>,
    lines: Vec<JournalLine>,
    posted: bool,
    version: u64,
    created: bool,
}

impl JournalEntry {
    /// Empty aggregate for rehydration.
    pub fn empty(id: JournalEntryId) -> Self {
        Self {
            id,
            tenant_id: None,
            entry_number: String::new(),
            entry_date: NaiveDate::default(),
            reference: String::new(),
            description: String::new(),
            project: None,
            created_by: None,
            lines: Vec::new(),
            posted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> JournalEntryId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn entry_number(&self) -> &str {
        &self.entry_number
    }

    pub fn entry_date(&self) -> NaiveDate {
        self.entry_date
    }

    pub fn project(&self) -> Option<ProjectId> {
        self.project
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    pub fn is_posted(&self) -> bool {
        self.posted
    }

    /// Sum of debit lines.
    pub fn total_debit(&self) -> i128 {
        self.lines
            .iter()
            .map(|l| l.debit_amount() as i128)
            .sum()
    }

    /// Sum of credit lines.
    pub fn total_credit(&self) -> i128 {
        self.lines
            .iter()
            .map(|l| l.credit_amount() as i128)
            .sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit() == self.total_credit()
    }

    fn next_line_no(&self) -> u32 {
        self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1
    }
}

impl AggregateRoot for JournalEntry {
    type Id = JournalEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEntry {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub entry_number: String,
    pub entry_date: NaiveDate,
    pub reference: String,
    pub description: String,
    pub project: Option<ProjectId>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (only while open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub line: LineInput,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLine (only while open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostEntry (freezes the entry; requires balance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalCommand {
    OpenEntry(OpenEntry),
    AddLine(AddLine),
    RemoveLine(RemoveLine),
    PostEntry(PostEntry),
}

/// Event: EntryOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOpened {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub entry_number: String,
    pub entry_date: NaiveDate,
    pub reference: String,
    pub description: String,
    pub project: Option<ProjectId>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub line: JournalLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EntryPosted.
///
/// Carries the full line snapshot and the balanced totals so read models can
/// be built from this event alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPosted {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub entry_number: String,
    pub entry_date: NaiveDate,
    pub project: Option<ProjectId>,
    pub lines: Vec<JournalLine>,
    pub total_debit: i128,
    pub total_credit: i128,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    EntryOpened(EntryOpened),
    LineAdded(LineAdded),
    LineRemoved(LineRemoved),
    EntryPosted(EntryPosted),
}

impl Event for JournalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JournalEvent::EntryOpened(_) => "accounting.journal.entry_opened",
            JournalEvent::LineAdded(_) => "accounting.journal.line_added",
            JournalEvent::LineRemoved(_) => "accounting.journal.line_removed",
            JournalEvent::EntryPosted(_) => "accounting.journal.entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JournalEvent::EntryOpened(e) => e.occurred_at,
            JournalEvent::LineAdded(e) => e.occurred_at,
            JournalEvent::LineRemoved(e) => e.occurred_at,
            JournalEvent::EntryPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for JournalEntry {
    type Command = JournalCommand;
    type Event = JournalEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            JournalEvent::EntryOpened(e) => {
                self.id = e.entry_id;
                self.tenant_id = Some(e.tenant_id);
                self.entry_number = e.entry_number.clone();
                self.entry_date = e.entry_date;
                self.reference = e.reference.clone();
                self.description = e.description.clone();
                self.project = e.project;
                self.created_by = Some(e.created_by);
                self.lines.clear();
                self.posted = false;
                self.created = true;
            }
            JournalEvent::LineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            JournalEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            JournalEvent::EntryPosted(_) => {
                self.posted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JournalCommand::OpenEntry(cmd) => self.handle_open(cmd),
            JournalCommand::AddLine(cmd) => self.handle_add_line(cmd),
            JournalCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            JournalCommand::PostEntry(cmd) => self.handle_post(cmd),
        }
    }
}

impl JournalEntry {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if !self.created {
            return Err(DomainError::not_found().into());
        }
        if self.posted {
            return Err(LedgerError::AlreadyPosted);
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenEntry) -> Result<Vec<JournalEvent>, LedgerError> {
        self.ensure_tenant(cmd.tenant_id)?;

        if self.created {
            return Err(DomainError::conflict("entry already exists").into());
        }
        if cmd.entry_number.trim().is_empty() {
            return Err(DomainError::validation("entry number cannot be empty").into());
        }
        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("description cannot be empty").into());
        }

        Ok(vec![JournalEvent::EntryOpened(EntryOpened {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            entry_number: cmd.entry_number.clone(),
            entry_date: cmd.entry_date,
            reference: cmd.reference.clone(),
            description: cmd.description.clone(),
            project: cmd.project,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<JournalEvent>, LedgerError> {
        self.ensure_open()?;
        self.ensure_tenant(cmd.tenant_id)?;

        let (side, amount) = validate_line(&cmd.line)?;

        Ok(vec![JournalEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            line: JournalLine {
                line_no: self.next_line_no(),
                account: cmd.line.account.clone(),
                description: cmd.line.description.clone(),
                amount,
                side,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<JournalEvent>, LedgerError> {
        self.ensure_open()?;
        self.ensure_tenant(cmd.tenant_id)?;

        if !self.lines.iter().any(|l| l.line_no == cmd.line_no) {
            return Err(DomainError::not_found().into());
        }

        Ok(vec![JournalEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostEntry) -> Result<Vec<JournalEvent>, LedgerError> {
        self.ensure_open()?;
        self.ensure_tenant(cmd.tenant_id)?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("journal entry must have lines").into());
        }

        let total_debit = self.total_debit();
        let total_credit = self.total_credit();
        if total_debit != total_credit {
            return Err(LedgerError::UnbalancedEntry {
                total_debit,
                total_credit,
            });
        }

        Ok(vec![JournalEvent::EntryPosted(EntryPosted {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            entry_number: self.entry_number.clone(),
            entry_date: self.entry_date,
            project: self.project,
            lines: self.lines.clone(),
            total_debit,
            total_credit,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn validate_line(line: &LineInput) -> Result<(EntrySide, i64), LedgerError> {
    if line.debit_amount < 0 || line.credit_amount < 0 {
        return Err(DomainError::validation("line amounts cannot be negative").into());
    }
    if line.account.code.trim().is_empty() {
        return Err(DomainError::validation("line account code cannot be empty").into());
    }
    match (line.debit_amount > 0, line.credit_amount > 0) {
        (true, false) => Ok((EntrySide::Debit, line.debit_amount)),
        (false, true) => Ok((EntrySide::Credit, line.credit_amount)),
        _ => Err(LedgerError::UnbalancedLine {
            debit: line.debit_amount,
            credit: line.credit_amount,
        }),
    }
}
