//! Branch workboards derived from the operations read model.
//!
//! Workboards are reporting views, never a source of truth: each call
//! regroups the current projection output and holds no state of its own.

use std::collections::HashMap;

use wareflow_core::{BranchId, TenantId, UserId};
use wareflow_operations::{OperationId, OperationKind, OperationState};

use crate::projections::cursor_store::ProjectionCursorStore;
use crate::projections::operations::{
    OperationReadModel, OperationsProjection, urgency_key,
};
use crate::read_model::TenantStore;

/// Branch-level counters for supervision dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchStatistics {
    pub branch_id: BranchId,
    pub total_operations: u64,
    /// Operations still open (not completed, not cancelled).
    pub open_operations: u64,
    pub by_kind_state: HashMap<(OperationKind, OperationState), u64>,
    pub items_demanded: u64,
    pub items_processed: u64,
}

/// Compact card for the kanban board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KanbanCard {
    pub operation_id: OperationId,
    pub folio: String,
    pub kind: OperationKind,
    pub assignee: Option<UserId>,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KanbanColumn {
    pub state: OperationState,
    pub cards: Vec<KanbanCard>,
}

/// One column per lifecycle state, cards urgency-ordered within each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KanbanBoard {
    pub branch_id: BranchId,
    pub columns: Vec<KanbanColumn>,
}

const COLUMN_STATES: [OperationState; 6] = [
    OperationState::Draft,
    OperationState::Assigned,
    OperationState::InProgress,
    OperationState::Partial,
    OperationState::Completed,
    OperationState::Cancelled,
];

impl<S, C> OperationsProjection<S, C>
where
    S: TenantStore<OperationId, OperationReadModel>,
    C: ProjectionCursorStore + 'static,
{
    /// Open operations of a branch, most urgent first.
    pub fn pending(&self, tenant_id: TenantId, branch_id: BranchId) -> Vec<OperationReadModel> {
        let mut results: Vec<OperationReadModel> = self
            .list(tenant_id)
            .into_iter()
            .filter(|rm| rm.branch_id == branch_id && !rm.state.is_terminal())
            .collect();
        results.sort_by_key(urgency_key);
        results
    }

    /// Counters for one branch: totals per kind and state plus demand and
    /// fulfillment unit sums across every operation of the branch.
    pub fn statistics(&self, tenant_id: TenantId, branch_id: BranchId) -> BranchStatistics {
        let mut stats = BranchStatistics {
            branch_id,
            total_operations: 0,
            open_operations: 0,
            by_kind_state: HashMap::new(),
            items_demanded: 0,
            items_processed: 0,
        };

        for rm in self.list(tenant_id) {
            if rm.branch_id != branch_id {
                continue;
            }
            stats.total_operations += 1;
            if !rm.state.is_terminal() {
                stats.open_operations += 1;
            }
            *stats.by_kind_state.entry((rm.kind, rm.state)).or_insert(0) += 1;
            for item in &rm.items {
                stats.items_demanded += item.demanded;
                stats.items_processed += item.processed;
            }
        }

        stats
    }

    /// Kanban view of one branch: every operation placed into its state
    /// column, urgency-ordered within the column.
    pub fn kanban(&self, tenant_id: TenantId, branch_id: BranchId) -> KanbanBoard {
        let mut operations: Vec<OperationReadModel> = self
            .list(tenant_id)
            .into_iter()
            .filter(|rm| rm.branch_id == branch_id)
            .collect();
        operations.sort_by_key(urgency_key);

        let mut columns: Vec<KanbanColumn> = COLUMN_STATES
            .iter()
            .map(|state| KanbanColumn {
                state: *state,
                cards: vec![],
            })
            .collect();

        for rm in operations {
            if let Some(column) = columns.iter_mut().find(|column| column.state == rm.state) {
                column.cards.push(KanbanCard {
                    operation_id: rm.operation_id,
                    folio: rm.folio,
                    kind: rm.kind,
                    assignee: rm.assignee,
                    priority: rm.priority,
                });
            }
        }

        KanbanBoard { branch_id, columns }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use wareflow_core::AggregateId;
    use wareflow_operations::{ItemState, OperationItemId, ProductId};

    use super::*;
    use crate::projections::operations::OperationItemReadModel;
    use crate::read_model::InMemoryTenantStore;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn board_item(demanded: u64, processed: u64) -> OperationItemReadModel {
        OperationItemReadModel {
            item_id: OperationItemId::new(AggregateId::new()),
            product_id: ProductId::new(AggregateId::new()),
            variant_id: None,
            serial_id: None,
            demanded,
            processed,
            packed: 0,
            available: processed,
            state: ItemState::from_quantities(processed, demanded),
            lot: None,
            source_location: None,
            destination_location: None,
        }
    }

    fn board_operation(
        branch_id: BranchId,
        folio: &str,
        kind: OperationKind,
        state: OperationState,
        priority: i32,
        age_minutes: i64,
    ) -> OperationReadModel {
        let created_at = Utc::now() - Duration::minutes(age_minutes);
        OperationReadModel {
            operation_id: OperationId::new(AggregateId::new()),
            branch_id,
            folio: folio.to_string(),
            kind,
            state,
            origin: None,
            source_location: None,
            destination_location: None,
            assignee: None,
            priority,
            scheduled_for: None,
            notes: String::new(),
            items: vec![board_item(10, 0)],
            packages: vec![],
            started_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn projection_with(
        tenant_id: TenantId,
        operations: Vec<OperationReadModel>,
    ) -> OperationsProjection<InMemoryTenantStore<OperationId, OperationReadModel>> {
        let store = InMemoryTenantStore::new();
        for rm in operations {
            store.upsert(tenant_id, rm.operation_id, rm);
        }
        OperationsProjection::new(store)
    }

    #[test]
    fn pending_excludes_terminal_operations_and_orders_by_urgency() {
        let tenant_id = test_tenant_id();
        let branch_id = BranchId::new();
        let other_branch = BranchId::new();

        let projection = projection_with(
            tenant_id,
            vec![
                board_operation(
                    branch_id,
                    "PIK-000002",
                    OperationKind::Picking,
                    OperationState::Draft,
                    5,
                    10,
                ),
                board_operation(
                    branch_id,
                    "PIK-000001",
                    OperationKind::Picking,
                    OperationState::InProgress,
                    1,
                    60,
                ),
                board_operation(
                    branch_id,
                    "PIK-000003",
                    OperationKind::Picking,
                    OperationState::Completed,
                    0,
                    120,
                ),
                board_operation(
                    other_branch,
                    "PIK-000004",
                    OperationKind::Picking,
                    OperationState::Draft,
                    0,
                    5,
                ),
            ],
        );

        let pending = projection.pending(tenant_id, branch_id);
        let folios: Vec<&str> = pending.iter().map(|rm| rm.folio.as_str()).collect();
        assert_eq!(folios, vec!["PIK-000001", "PIK-000002"]);
    }

    #[test]
    fn statistics_count_kind_state_pairs_and_item_totals() {
        let tenant_id = test_tenant_id();
        let branch_id = BranchId::new();

        let mut receiving = board_operation(
            branch_id,
            "RCV-000001",
            OperationKind::Receiving,
            OperationState::Partial,
            0,
            30,
        );
        receiving.items = vec![board_item(10, 4), board_item(5, 0)];

        let picking = board_operation(
            branch_id,
            "PIK-000001",
            OperationKind::Picking,
            OperationState::Draft,
            0,
            20,
        );

        let projection = projection_with(tenant_id, vec![receiving, picking]);
        let stats = projection.statistics(tenant_id, branch_id);

        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.open_operations, 2);
        assert_eq!(
            stats
                .by_kind_state
                .get(&(OperationKind::Receiving, OperationState::Partial)),
            Some(&1)
        );
        assert_eq!(
            stats
                .by_kind_state
                .get(&(OperationKind::Picking, OperationState::Draft)),
            Some(&1)
        );
        assert_eq!(stats.items_demanded, 25);
        assert_eq!(stats.items_processed, 4);
    }

    #[test]
    fn kanban_places_every_operation_in_its_state_column() {
        let tenant_id = test_tenant_id();
        let branch_id = BranchId::new();

        let projection = projection_with(
            tenant_id,
            vec![
                board_operation(
                    branch_id,
                    "PAK-000001",
                    OperationKind::Packing,
                    OperationState::InProgress,
                    2,
                    15,
                ),
                board_operation(
                    branch_id,
                    "PAK-000002",
                    OperationKind::Packing,
                    OperationState::InProgress,
                    1,
                    5,
                ),
                board_operation(
                    branch_id,
                    "SHP-000001",
                    OperationKind::Shipping,
                    OperationState::Draft,
                    0,
                    2,
                ),
            ],
        );

        let board = projection.kanban(tenant_id, branch_id);
        assert_eq!(board.columns.len(), 6);

        let in_progress = board
            .columns
            .iter()
            .find(|column| column.state == OperationState::InProgress)
            .map(|column| {
                column
                    .cards
                    .iter()
                    .map(|card| card.folio.as_str())
                    .collect::<Vec<_>>()
            });
        assert_eq!(in_progress, Some(vec!["PAK-000002", "PAK-000001"]));

        let draft = board
            .columns
            .iter()
            .find(|column| column.state == OperationState::Draft)
            .map(|column| column.cards.len());
        assert_eq!(draft, Some(1));

        let empty_states = board
            .columns
            .iter()
            .filter(|column| column.cards.is_empty())
            .count();
        assert_eq!(empty_states, 4);
    }
}
