//! Stock levels projection: lot receipts/issues → on-hand quantity and book
//! value per (material, project) group.

use serde_json::Value as JsonValue;
use thiserror::Error;

use masonerp_core::{ProjectId, TenantId};
use masonerp_events::EventEnvelope;
use masonerp_inventory::{MaterialId, StockEvent, StockLedgerId};

use crate::projections::cursors::Cursors;
use crate::read_model::TenantStore;

/// Aggregate type string stock streams are appended under.
pub const STOCK_AGGREGATE_TYPE: &str = "inventory.stock";

/// Read model: current position of one stock group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub stock_id: StockLedgerId,
    pub material_id: MaterialId,
    pub project_id: ProjectId,
    /// Total remaining quantity across lots.
    pub on_hand: i64,
    /// Σ remaining quantity × unit rate across lots.
    pub book_value: i128,
}

#[derive(Debug, Error)]
pub enum StockLevelsError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("stock issue for unknown group {0}")]
    UnknownGroup(StockLedgerId),
}

/// Projection: stock ledgers → per-group levels and valuation per tenant.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: TenantStore<StockLedgerId, StockLevel>,
{
    store: S,
    cursors: Cursors,
}

impl<S> StockLevelsProjection<S>
where
    S: TenantStore<StockLedgerId, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Cursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, stock_id: &StockLedgerId) -> Option<StockLevel> {
        self.store.get(tenant_id, stock_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        self.store.list(tenant_id)
    }

    /// Book value across all stock groups of a tenant.
    pub fn total_value(&self, tenant_id: TenantId) -> i128 {
        self.store
            .list(tenant_id)
            .iter()
            .map(|level| level.book_value)
            .sum()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockLevelsError> {
        if envelope.aggregate_type() != STOCK_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursors.last(tenant_id, aggregate_id);

        if seq == 0 {
            return Err(StockLevelsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Already processed (at-least-once delivery); skip.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(StockLevelsError::NonMonotonicSequence { last, found: seq });
        }

        let ev: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockLevelsError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            StockEvent::LotReceived(e) => e.tenant_id,
            StockEvent::StockIssued(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(StockLevelsError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            StockEvent::LotReceived(e) => {
                let mut level = self.store.get(tenant_id, &e.stock_id).unwrap_or(StockLevel {
                    stock_id: e.stock_id,
                    material_id: e.material_id,
                    project_id: e.project_id,
                    on_hand: 0,
                    book_value: 0,
                });
                level.on_hand += e.lot.quantity;
                level.book_value += e.lot.book_value();
                self.store.upsert(tenant_id, e.stock_id, level);
            }
            StockEvent::StockIssued(e) => {
                let mut level = self
                    .store
                    .get(tenant_id, &e.stock_id)
                    .ok_or(StockLevelsError::UnknownGroup(e.stock_id))?;
                level.on_hand -= e.quantity;
                level.book_value -= e.cost;
                self.store.upsert(tenant_id, e.stock_id, level);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Clear affected tenants and replay from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockLevelsError> {
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
