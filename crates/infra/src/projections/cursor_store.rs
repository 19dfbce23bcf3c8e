//! Projection cursor/offset persistence.
//!
//! Cursors track the last processed sequence_number per (tenant, aggregate)
//! stream for a named projection. This enables:
//! - Idempotent projections (replays <= cursor are ignored)
//! - Resume after restart (projections continue from the last offset)
//! - Deterministic rebuilds (clear offsets and replay from scratch)

use std::collections::HashMap;
use std::sync::RwLock;

use wareflow_core::{AggregateId, TenantId};

/// Projection cursor store for persisting offsets.
pub trait ProjectionCursorStore: Send + Sync {
    /// Get the last processed sequence_number for a (tenant, aggregate, projection) stream.
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64>;

    /// Update the cursor to a new sequence_number.
    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    );

    /// Clear all cursors for a tenant + projection (for rebuilds).
    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OffsetKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    projection_name: String,
}

/// Cursor store that keeps offsets in process memory.
///
/// Offsets survive projection rebuilds of the same process but not a
/// restart; a durable backend would implement the same trait.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    offsets: RwLock<HashMap<OffsetKey, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64> {
        let offsets = self.offsets.read().ok()?;
        offsets
            .get(&OffsetKey {
                tenant_id,
                aggregate_id,
                projection_name: projection_name.to_string(),
            })
            .copied()
    }

    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) {
        if let Ok(mut offsets) = self.offsets.write() {
            offsets.insert(
                OffsetKey {
                    tenant_id,
                    aggregate_id,
                    projection_name: projection_name.to_string(),
                },
                sequence_number,
            );
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str) {
        if let Ok(mut offsets) = self.offsets.write() {
            offsets.retain(|key, _| {
                key.tenant_id != tenant_id || key.projection_name != projection_name
            });
        }
    }
}
