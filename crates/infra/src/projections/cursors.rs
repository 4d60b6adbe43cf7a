use std::collections::HashMap;
use std::sync::RwLock;

use masonerp_core::{AggregateId, TenantId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Last-processed sequence number per (tenant, aggregate) stream.
///
/// Replays at or below the cursor are skipped, which makes projections safe
/// under the bus's at-least-once delivery.
#[derive(Debug, Default)]
pub(crate) struct Cursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl Cursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(map) => *map
                .get(&CursorKey {
                    tenant_id,
                    aggregate_id,
                })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    pub(crate) fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, sequence: u64) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                sequence,
            );
        }
    }

    pub(crate) fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|k, _| k.tenant_id != tenant_id);
        }
    }
}
