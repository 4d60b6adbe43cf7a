//! Command execution pipeline (application-level orchestration).
//!
//! The dispatcher runs every command through the same lifecycle:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (for projections, handlers, etc.)
//! ```
//!
//! Everything before step 4 is side-effect free, so a rejected command leaves
//! no partial writes behind; the append itself is atomic per batch. A
//! `Concurrency` failure means another writer got to the stream first; the
//! caller reloads and retries (see [`CommandDispatcher::dispatch_with_retry`]),
//! which is the serialization discipline stock-sequence assignment relies on.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use masonerp_accounting::LedgerError;
use masonerp_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use masonerp_events::{EventBus, EventEnvelope};
use masonerp_inventory::StockError;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version). Retryable.
    Concurrency(String),
    /// Tenant isolation violation (cross-tenant or cross-aggregate stream mixing).
    TenantIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl DispatchError {
    /// Whether reloading the stream and re-executing the command can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::UnbalancedLine { .. } => DispatchError::Validation(value.to_string()),
            LedgerError::UnbalancedEntry { .. } | LedgerError::AlreadyPosted => {
                DispatchError::InvariantViolation(value.to_string())
            }
            LedgerError::Domain(inner) => inner.into(),
        }
    }
}

impl From<StockError> for DispatchError {
    fn from(value: StockError) -> Self {
        match value {
            StockError::InsufficientStock { .. } => {
                DispatchError::InvariantViolation(value.to_string())
            }
            // A duplicate sequence is a serialization failure in the stream;
            // treat it like a concurrency conflict so callers retry.
            StockError::DuplicateSequence { .. } => DispatchError::Concurrency(value.to_string()),
            StockError::Domain(inner) => inner.into(),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run fully in memory and real
/// backends slot in without touching domain code. Aggregates must be
/// deterministic, side-effect free, and version-aware (+1 per applied event).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// Uses optimistic concurrency: the stream version observed at load time
    /// is expected at append time, so a concurrent writer on the same stream
    /// surfaces as `DispatchError::Concurrency`. Tenant isolation and
    /// monotonic sequencing of the loaded stream are validated before
    /// rehydration (defense in depth against a buggy backend).
    ///
    /// Returns the committed events (with assigned sequence numbers).
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate,
        A::Event: masonerp_events::Event + Serialize + DeserializeOwned,
        DispatchError: From<A::Error>,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        debug!(
            aggregate_type = %aggregate_type,
            aggregate_id = %aggregate_id,
            events = committed.len(),
            "committed events"
        );

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus.publish(stored.to_envelope()).map_err(|e| {
                warn!(aggregate_id = %aggregate_id, "event publication failed after append");
                DispatchError::Publish(format!("{e:?}"))
            })?;
        }

        Ok(committed)
    }

    /// Dispatch with bounded retry on concurrency conflicts.
    ///
    /// Each attempt reloads the stream, so decisions that depend on current
    /// state (sequence assignment in particular) are re-derived against what
    /// the winning writer committed.
    pub fn dispatch_with_retry<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        mut make_aggregate: impl FnMut(TenantId, AggregateId) -> A,
        max_attempts: u32,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate,
        A::Command: Clone,
        A::Event: masonerp_events::Event + Serialize + DeserializeOwned,
        DispatchError: From<A::Error>,
    {
        let aggregate_type = aggregate_type.into();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.dispatch(
                tenant_id,
                aggregate_id,
                aggregate_type.clone(),
                command.clone(),
                &mut make_aggregate,
            ) {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    debug!(aggregate_id = %aggregate_id, attempt, "retrying after conflict");
                }
                other => return other,
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    // Also ensure the stream is monotonically increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
