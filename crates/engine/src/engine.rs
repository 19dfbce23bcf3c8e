//! Application facade over the fulfillment domain.
//!
//! `FulfillmentEngine` is the surface controllers call: one method per
//! exposed action or read endpoint. Every mutation runs exactly one command
//! through the dispatcher and then folds the committed events into the
//! operations projection before returning, so a caller always reads its own
//! writes. The bus still receives every committed envelope for secondary
//! consumers; the projection ignores the duplicate delivery because applies
//! are idempotent per cursor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use wareflow_core::{Aggregate, AggregateId, BranchId, DomainError, TenantId, UserId};
use wareflow_events::{EventEnvelope, InMemoryEventBus};
use wareflow_infra::chain::{ChainGenerationError, ChainGenerator, ChainResolver, DocumentChain};
use wareflow_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use wareflow_infra::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use wareflow_infra::folio::{FolioGenerator, FolioKind, SequentialFolioGenerator};
use wareflow_infra::projections::{
    BranchStatistics, KanbanBoard, OperationFilter, OperationReadModel, OperationsProjection,
    PackageReadModel,
};
use wareflow_infra::read_model::InMemoryTenantStore;
use wareflow_operations::{
    AddPackageItem, AppendNote, AssignOperation, CancelItem, CancelOperation, CancelPackage,
    ClosePackage, CreateOperation, CreatePackage, Dimensions, FulfillmentOperation, ItemProgress,
    ItemSpec, LabelPackage, LocationId, OperationCommand, OperationEvent, OperationId,
    OperationItemId, OperationKind, OriginRef, PackageId, PackageItemId, PackingLabel,
    ProcessItems, RemovePackageItem, SerialNumberId, ShipPackage, StartOperation, UpdatePackage,
};

use crate::label::{AvailableItem, PackingSummary};

const OPERATION_AGGREGATE_TYPE: &str = "fulfillment.operation";

/// Errors surfaced to callers, folded into four families by how the caller
/// should react: fix the request, re-read then retry, treat as missing, or
/// retry the whole action.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request is wrong (illegal transition, empty input, over-demand
    /// quantity, frozen package). Retrying unchanged cannot succeed.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Lost a race or asked for more than remains. Re-read, then retry.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Missing target. Foreign-tenant targets look exactly like missing ones.
    #[error("not found")]
    NotFound,
    /// Infrastructure failure. Nothing partial was committed; the whole
    /// action is safe to retry.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl From<DispatchError> for EngineError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => {
                EngineError::Validation(msg)
            }
            DispatchError::Conflict(msg) => EngineError::Conflict(msg),
            DispatchError::NotFound => EngineError::NotFound,
            DispatchError::TenantIsolation(msg)
            | DispatchError::Deserialize(msg)
            | DispatchError::Publish(msg) => EngineError::Transaction(msg),
            DispatchError::Store(err) => EngineError::Transaction(err.to_string()),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
            DomainError::NotFound => EngineError::NotFound,
        }
    }
}

impl From<ChainGenerationError> for EngineError {
    fn from(value: ChainGenerationError) -> Self {
        match value {
            ChainGenerationError::OriginNotFound(_) => EngineError::NotFound,
            ChainGenerationError::Failed(msg) => EngineError::Transaction(msg),
        }
    }
}

/// Input for creating an operation. The engine allocates the folio and the
/// operation id; everything else is caller-supplied. Items are fixed at
/// creation, an operation never gains or loses demand lines afterwards.
#[derive(Debug, Clone)]
pub struct OperationDraft {
    pub branch_id: BranchId,
    pub kind: OperationKind,
    pub origin: Option<OriginRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
    /// Lower values are more urgent.
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: String,
    pub items: Vec<ItemSpec>,
}

/// Attribute changes for an open package. Present fields replace, absent
/// fields are kept.
#[derive(Debug, Clone, Default)]
pub struct PackagePatch {
    pub weight_grams: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub notes: Option<String>,
}

pub type EngineBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type EngineProjection =
    OperationsProjection<Arc<InMemoryTenantStore<OperationId, OperationReadModel>>>;

type ReadModelStore = Arc<InMemoryTenantStore<OperationId, OperationReadModel>>;
type EngineDispatcher = CommandDispatcher<Arc<InMemoryEventStore>, EngineBus>;

/// The fulfillment application service.
///
/// Owns the full in-memory stack: event store, bus, dispatcher, operations
/// projection and its read-model store, chain resolver, and the two ports
/// (folio and chain generation). Cheap to construct per test; shared behind
/// an `Arc` in a real process.
pub struct FulfillmentEngine {
    dispatcher: EngineDispatcher,
    store: Arc<InMemoryEventStore>,
    bus: EngineBus,
    projection: Arc<EngineProjection>,
    resolver: ChainResolver<ReadModelStore>,
    folios: Arc<dyn FolioGenerator>,
    chains: Arc<dyn ChainGenerator>,
}

impl FulfillmentEngine {
    /// Wire a fully in-memory engine with sequential folios.
    ///
    /// The chain generator stays a caller-supplied port: which operations a
    /// purchase order or sale expands into is decided outside this crate.
    pub fn in_memory(chains: Arc<dyn ChainGenerator>) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: EngineBus = Arc::new(InMemoryEventBus::new());
        let read_models: ReadModelStore = Arc::new(InMemoryTenantStore::new());
        let projection = Arc::new(OperationsProjection::new(read_models.clone()));
        let resolver = ChainResolver::new(read_models);
        let dispatcher = CommandDispatcher::new(store.clone(), bus.clone());
        let folios: Arc<dyn FolioGenerator> = Arc::new(SequentialFolioGenerator::new());

        Self {
            dispatcher,
            store,
            bus,
            projection,
            resolver,
            folios,
            chains,
        }
    }

    /// The bus every committed event is published on. Secondary consumers
    /// subscribe here; the engine itself never reads from it.
    pub fn bus(&self) -> &EngineBus {
        &self.bus
    }

    pub fn projection(&self) -> &Arc<EngineProjection> {
        &self.projection
    }

    // ---- operation actions ------------------------------------------------

    pub fn create_operation(
        &self,
        tenant_id: TenantId,
        draft: OperationDraft,
        created_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let operation_id = OperationId::new(AggregateId::new());
        let folio = self.folios.next(tenant_id, FolioKind::Operation(draft.kind));

        let command = OperationCommand::CreateOperation(CreateOperation {
            tenant_id,
            operation_id,
            branch_id: draft.branch_id,
            kind: draft.kind,
            folio,
            origin: draft.origin,
            source_location: draft.source_location,
            destination_location: draft.destination_location,
            priority: draft.priority,
            scheduled_for: draft.scheduled_for,
            notes: draft.notes,
            items: draft.items,
            created_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;

        let rm = self.refreshed(tenant_id, &operation_id)?;
        tracing::info!(folio = %rm.folio, kind = ?rm.kind, "fulfillment operation created");
        Ok(rm)
    }

    pub fn assign(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        assignee: UserId,
        assigned_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let command = OperationCommand::AssignOperation(AssignOperation {
            tenant_id,
            operation_id,
            assignee,
            assigned_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed(tenant_id, &operation_id)
    }

    pub fn start(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        started_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let command = OperationCommand::StartOperation(StartOperation {
            tenant_id,
            operation_id,
            started_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed(tenant_id, &operation_id)
    }

    /// Apply a batch of fulfillment deltas atomically: either every delta
    /// commits or none does.
    pub fn process_items(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        items: Vec<ItemProgress>,
        processed_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let command = OperationCommand::ProcessItems(ProcessItems {
            tenant_id,
            operation_id,
            items,
            processed_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed(tenant_id, &operation_id)
    }

    /// Cancel a whole operation. Idempotent: cancelling an already cancelled
    /// operation commits nothing and returns the current state.
    pub fn cancel_operation(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        reason: impl Into<String>,
        cancelled_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let command = OperationCommand::CancelOperation(CancelOperation {
            tenant_id,
            operation_id,
            reason: reason.into(),
            cancelled_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed(tenant_id, &operation_id)
    }

    pub fn cancel_item(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        item_id: OperationItemId,
        cancelled_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let command = OperationCommand::CancelItem(CancelItem {
            tenant_id,
            operation_id,
            item_id,
            cancelled_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed(tenant_id, &operation_id)
    }

    /// The one mutation allowed on terminal operations.
    pub fn append_note(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        note: impl Into<String>,
        noted_by: UserId,
    ) -> Result<OperationReadModel, EngineError> {
        let command = OperationCommand::AppendNote(AppendNote {
            tenant_id,
            operation_id,
            note: note.into(),
            noted_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed(tenant_id, &operation_id)
    }

    // ---- packaging actions ------------------------------------------------

    pub fn create_package(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        notes: Option<String>,
        created_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let package_id = PackageId::new(AggregateId::new());
        let folio = self.folios.next(tenant_id, FolioKind::Package);

        let command = OperationCommand::CreatePackage(CreatePackage {
            tenant_id,
            operation_id,
            package_id,
            folio,
            notes,
            created_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    pub fn add_package_item(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        operation_item_id: OperationItemId,
        quantity: u64,
        serial_id: Option<SerialNumberId>,
        added_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::AddPackageItem(AddPackageItem {
            tenant_id,
            operation_id,
            package_id,
            package_item_id: PackageItemId::new(AggregateId::new()),
            operation_item_id,
            quantity,
            serial_id,
            added_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    pub fn remove_package_item(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        package_item_id: PackageItemId,
        removed_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::RemovePackageItem(RemovePackageItem {
            tenant_id,
            operation_id,
            package_id,
            package_item_id,
            removed_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    pub fn update_package(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        patch: PackagePatch,
        updated_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::UpdatePackage(UpdatePackage {
            tenant_id,
            operation_id,
            package_id,
            weight_grams: patch.weight_grams,
            dimensions: patch.dimensions,
            notes: patch.notes,
            updated_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    pub fn close_package(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        closed_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::ClosePackage(ClosePackage {
            tenant_id,
            operation_id,
            package_id,
            closed_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    pub fn label_package(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        carrier: impl Into<String>,
        tracking_code: impl Into<String>,
        labeled_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::LabelPackage(LabelPackage {
            tenant_id,
            operation_id,
            package_id,
            carrier: carrier.into(),
            tracking_code: tracking_code.into(),
            labeled_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    pub fn ship_package(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        shipped_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::ShipPackage(ShipPackage {
            tenant_id,
            operation_id,
            package_id,
            shipped_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        let package = self.refreshed_package(tenant_id, &operation_id, package_id)?;
        tracing::info!(folio = %package.folio, "package shipped");
        Ok(package)
    }

    /// Cancel a package; its packed quantities return to the available pool.
    /// Idempotent on an already cancelled package.
    pub fn cancel_package(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
        reason: Option<String>,
        cancelled_by: UserId,
    ) -> Result<PackageReadModel, EngineError> {
        let command = OperationCommand::CancelPackage(CancelPackage {
            tenant_id,
            operation_id,
            package_id,
            reason,
            cancelled_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_operation(tenant_id, operation_id, command)?;
        self.refreshed_package(tenant_id, &operation_id, package_id)
    }

    // ---- chain generation -------------------------------------------------

    /// Expand a purchase order into its fulfillment chain. The layout is the
    /// generator's decision; the result is forwarded unchanged.
    pub fn generate_from_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: AggregateId,
        branch_id: BranchId,
        requested_by: UserId,
    ) -> Result<Vec<OperationId>, EngineError> {
        let generated =
            self.chains
                .from_purchase_order(tenant_id, purchase_order_id, branch_id, requested_by)?;
        tracing::info!(count = generated.len(), "operation chain generated from purchase order");
        Ok(generated)
    }

    pub fn generate_from_sale(
        &self,
        tenant_id: TenantId,
        sale_id: AggregateId,
        branch_id: BranchId,
        requested_by: UserId,
    ) -> Result<Vec<OperationId>, EngineError> {
        let generated = self
            .chains
            .from_sale(tenant_id, sale_id, branch_id, requested_by)?;
        tracing::info!(count = generated.len(), "operation chain generated from sale");
        Ok(generated)
    }

    // ---- reads ------------------------------------------------------------

    /// Header plus items plus packages for one operation.
    pub fn get(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Result<OperationReadModel, EngineError> {
        self.projection
            .get(tenant_id, operation_id)
            .ok_or(EngineError::NotFound)
    }

    /// Filtered listing, most urgent first.
    pub fn list(&self, tenant_id: TenantId, filter: &OperationFilter) -> Vec<OperationReadModel> {
        self.projection.query(tenant_id, filter)
    }

    pub fn pending(&self, tenant_id: TenantId, branch_id: BranchId) -> Vec<OperationReadModel> {
        self.projection.pending(tenant_id, branch_id)
    }

    pub fn statistics(&self, tenant_id: TenantId, branch_id: BranchId) -> BranchStatistics {
        self.projection.statistics(tenant_id, branch_id)
    }

    pub fn kanban(&self, tenant_id: TenantId, branch_id: BranchId) -> KanbanBoard {
        self.projection.kanban(tenant_id, branch_id)
    }

    pub fn resolve_chain(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Result<DocumentChain, EngineError> {
        self.resolver
            .resolve(tenant_id, operation_id)
            .map_err(EngineError::from)
    }

    /// Label data for one package, assembled from the event stream rather
    /// than the projection: a label is a printed document, so it reads the
    /// source of truth.
    pub fn packing_label(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        package_id: PackageId,
    ) -> Result<PackingLabel, EngineError> {
        let operation = self.load_operation(tenant_id, operation_id)?;
        PackingLabel::for_package(&operation, package_id).map_err(EngineError::from)
    }

    /// Packing progress of one operation: per-package totals plus the
    /// packed/unpacked split.
    pub fn packing_summary(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Result<PackingSummary, EngineError> {
        let rm = self.get(tenant_id, operation_id)?;
        Ok(PackingSummary::for_operation(&rm))
    }

    /// Items that still have fulfilled quantity free to pack.
    pub fn available_to_pack(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Result<Vec<AvailableItem>, EngineError> {
        let rm = self.get(tenant_id, operation_id)?;
        Ok(AvailableItem::for_operation(&rm))
    }

    // ---- internals --------------------------------------------------------

    fn dispatch_operation(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        command: OperationCommand,
    ) -> Result<Vec<StoredEvent>, EngineError> {
        let committed = self.dispatcher.dispatch(
            tenant_id,
            operation_id.0,
            OPERATION_AGGREGATE_TYPE,
            command,
            |_, aggregate_id| FulfillmentOperation::empty(OperationId::new(aggregate_id)),
        )?;
        self.apply_committed(&committed);
        Ok(committed)
    }

    /// Fold committed events into the projection before returning to the
    /// caller. A failed apply is logged, not surfaced: the events are
    /// durable and a later replay repairs the read model.
    fn apply_committed(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(err) = self.projection.apply_envelope(&stored.to_envelope()) {
                tracing::warn!(error = %err, "projection apply failed after commit");
            }
        }
    }

    fn refreshed(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Result<OperationReadModel, EngineError> {
        self.projection
            .get(tenant_id, operation_id)
            .ok_or(EngineError::NotFound)
    }

    fn refreshed_package(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
        package_id: PackageId,
    ) -> Result<PackageReadModel, EngineError> {
        let rm = self.refreshed(tenant_id, operation_id)?;
        rm.package(package_id).cloned().ok_or(EngineError::NotFound)
    }

    /// Rehydrate one operation from its stream, in sequence order.
    fn load_operation(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
    ) -> Result<FulfillmentOperation, EngineError> {
        let mut history = self
            .store
            .load_stream(tenant_id, operation_id.0)
            .map_err(|err| EngineError::Transaction(err.to_string()))?;
        if history.is_empty() {
            return Err(EngineError::NotFound);
        }
        history.sort_by_key(|stored| stored.sequence_number);

        let mut operation = FulfillmentOperation::empty(operation_id);
        for stored in history {
            let event: OperationEvent = serde_json::from_value(stored.payload)
                .map_err(|err| EngineError::Transaction(err.to_string()))?;
            operation.apply(&event);
        }
        Ok(operation)
    }
}
