//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Tenant-isolated**: Data is partitioned by tenant
//! - **Idempotent**: Safe for at-least-once delivery

pub mod cursor_store;
pub mod operations;
pub mod workboard;

pub use cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
pub use operations::{
    OperationFilter, OperationItemReadModel, OperationProjectionError, OperationReadModel,
    OperationsProjection, PackageLineReadModel, PackageReadModel,
};
pub use workboard::{BranchStatistics, KanbanBoard, KanbanCard, KanbanColumn};
