//! General ledger projection: posted journal entries → statement rows.
//!
//! Stores the flattened [`PostedLine`] rows per entry and derives trial
//! balance, P&L and balance sheet snapshots on demand. Statement generation
//! is read-only aggregation: it never raises on inconsistent data; callers
//! check `is_balanced()` / `identity_gap()` and treat violations as data
//! quality alarms.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;

use masonerp_accounting::{
    JournalEntryId, JournalEvent, PostedLine, Statement, balance_sheet, profit_and_loss,
    trial_balance,
};
use masonerp_core::{ProjectId, TenantId};
use masonerp_events::EventEnvelope;

use crate::projections::cursors::Cursors;
use crate::read_model::TenantStore;

/// Aggregate type string journal streams are appended under.
pub const JOURNAL_AGGREGATE_TYPE: &str = "accounting.journal";

/// Read model: the posted lines of one journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedEntryLines {
    pub entry_id: JournalEntryId,
    pub lines: Vec<PostedLine>,
}

#[derive(Debug, Error)]
pub enum GeneralLedgerError {
    #[error("failed to deserialize journal event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: journal streams → general ledger rows per tenant.
#[derive(Debug)]
pub struct GeneralLedgerProjection<S>
where
    S: TenantStore<JournalEntryId, PostedEntryLines>,
{
    store: S,
    cursors: Cursors,
}

impl<S> GeneralLedgerProjection<S>
where
    S: TenantStore<JournalEntryId, PostedEntryLines>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Cursors::new(),
        }
    }

    /// All posted lines for a tenant (unordered; statements aggregate anyway).
    pub fn posted_lines(&self, tenant_id: TenantId) -> Vec<PostedLine> {
        self.store
            .list(tenant_id)
            .into_iter()
            .flat_map(|entry| entry.lines)
            .collect()
    }

    pub fn trial_balance(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        project: Option<ProjectId>,
    ) -> Statement {
        trial_balance(&self.posted_lines(tenant_id), as_of, project)
    }

    pub fn profit_and_loss(
        &self,
        tenant_id: TenantId,
        start: NaiveDate,
        end: NaiveDate,
        project: Option<ProjectId>,
    ) -> Statement {
        profit_and_loss(&self.posted_lines(tenant_id), start, end, project)
    }

    pub fn balance_sheet(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        project: Option<ProjectId>,
    ) -> Statement {
        balance_sheet(&self.posted_lines(tenant_id), as_of, project)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), GeneralLedgerError> {
        if envelope.aggregate_type() != JOURNAL_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursors.last(tenant_id, aggregate_id);

        if seq == 0 {
            return Err(GeneralLedgerError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Already processed (at-least-once delivery); skip.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(GeneralLedgerError::NonMonotonicSequence { last, found: seq });
        }

        let ev: JournalEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| GeneralLedgerError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            JournalEvent::EntryOpened(e) => e.tenant_id,
            JournalEvent::LineAdded(e) => e.tenant_id,
            JournalEvent::LineRemoved(e) => e.tenant_id,
            JournalEvent::EntryPosted(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(GeneralLedgerError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        // Only posted entries reach the general ledger; open/edit events just
        // advance the cursor.
        if let JournalEvent::EntryPosted(e) = ev {
            let lines = PostedLine::from_entry(&e);
            self.store.upsert(
                tenant_id,
                e.entry_id,
                PostedEntryLines {
                    entry_id: e.entry_id,
                    lines,
                },
            );
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Clear affected tenants and replay from scratch (read models are
    /// disposable; events are the source of truth).
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), GeneralLedgerError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
