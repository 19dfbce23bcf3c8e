//! Infrastructure layer: event storage, command dispatch, read models.
//!
//! Everything here is backend-agnostic plumbing around the fulfillment
//! domain: the append-only event store boundary, the command dispatcher
//! (the tenant transaction context), projections over published envelopes,
//! and the folio/chain collaborator ports the engine composes.

pub mod chain;
pub mod command_dispatcher;
pub mod event_store;
pub mod folio;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use chain::{ChainGenerationError, ChainGenerator, ChainResolver, DocumentChain};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PublishingEventStore, StoredEvent,
    UncommittedEvent,
};
pub use folio::{FolioGenerator, FolioKind, SequentialFolioGenerator};
pub use projections::{
    BranchStatistics, KanbanBoard, KanbanCard, KanbanColumn, OperationFilter,
    OperationItemReadModel, OperationProjectionError, OperationReadModel, OperationsProjection,
    PackageLineReadModel, PackageReadModel,
};
pub use read_model::{InMemoryTenantStore, TenantStore};
pub use workers::{ProjectionWorker, WorkerHandle};
