use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{
    Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, TenantId, UserId, ValueObject,
};
use wareflow_events::Event;

use crate::item::{
    ItemProgress, ItemSpec, ItemState, LocationId, OperationItem, OperationItemId,
};
use crate::packaging::{
    AddPackageItem, CancelPackage, ClosePackage, CreatePackage, LabelPackage, Package,
    PackageCancelled, PackageClosed, PackageCreated, PackageId, PackageItemAdded,
    PackageItemRemoved, PackageLabeled, PackageShipped, PackageState, PackageUpdated,
    RemovePackageItem, ShipPackage, UpdatePackage,
};

/// Fulfillment operation identifier (tenant-scoped via `tenant_id` fields in
/// events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub AggregateId);

impl OperationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OperationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stage of the fulfillment process an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Receiving,
    QualityControl,
    Putaway,
    Picking,
    Packing,
    Shipping,
    Manual,
}

/// Operation lifecycle.
///
/// `Partial` and `Completed` are derived from the item mix; `Draft`,
/// `Assigned`, `InProgress` and `Cancelled` are operation-level decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Draft,
    Assigned,
    InProgress,
    Partial,
    Completed,
    Cancelled,
}

impl OperationState {
    /// Terminal operations are immutable except for audit notes.
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Cancelled)
    }

    /// State implied by the item mix after a fulfillment update.
    ///
    /// `Completed` when every item is settled (completed or cancelled);
    /// `Partial` when at least one item has advanced and at least one is
    /// still pending; `None` leaves the current state unchanged.
    pub fn from_items(items: &[OperationItem]) -> Option<OperationState> {
        Self::from_item_states(items.iter().map(|item| item.state))
    }

    /// Same derivation over bare item states. Read models use this so the
    /// rule has a single definition.
    pub fn from_item_states(states: impl IntoIterator<Item = ItemState>) -> Option<OperationState> {
        let mut any = false;
        let mut all_settled = true;
        let mut any_advanced = false;
        let mut any_pending = false;

        for state in states {
            any = true;
            if !state.is_terminal() {
                all_settled = false;
            }
            match state {
                ItemState::InProgress | ItemState::Completed => any_advanced = true,
                ItemState::Pending => any_pending = true,
                ItemState::Cancelled => {}
            }
        }

        if !any {
            return None;
        }
        if all_settled {
            return Some(OperationState::Completed);
        }
        if any_advanced && any_pending {
            return Some(OperationState::Partial);
        }
        None
    }
}

/// Kind of source document an operation chain hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    PurchaseOrder,
    Sale,
    Operation,
}

/// Reference to the document (or predecessor operation) this operation was
/// derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRef {
    pub kind: OriginKind,
    pub origin_id: AggregateId,
    pub origin_folio: Option<String>,
}

impl ValueObject for OriginRef {}

/// Aggregate root: one stage of a warehouse fulfillment process, owning its
/// demand lines and (for packing operations) its packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentOperation {
    pub(crate) id: OperationId,
    pub(crate) tenant_id: Option<TenantId>,
    pub(crate) branch_id: Option<BranchId>,
    pub(crate) folio: String,
    pub(crate) kind: Option<OperationKind>,
    pub(crate) state: OperationState,
    pub(crate) origin: Option<OriginRef>,
    pub(crate) source_location: Option<LocationId>,
    pub(crate) destination_location: Option<LocationId>,
    pub(crate) assignee: Option<UserId>,
    pub(crate) priority: i32,
    pub(crate) scheduled_for: Option<DateTime<Utc>>,
    pub(crate) notes: String,
    pub(crate) items: Vec<OperationItem>,
    pub(crate) packages: Vec<Package>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) created_by: Option<UserId>,
    pub(crate) created_at: Option<DateTime<Utc>>,
    pub(crate) updated_by: Option<UserId>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
    pub(crate) version: u64,
    pub(crate) created: bool,
}

impl FulfillmentOperation {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OperationId) -> Self {
        Self {
            id,
            tenant_id: None,
            branch_id: None,
            folio: String::new(),
            kind: None,
            state: OperationState::Draft,
            origin: None,
            source_location: None,
            destination_location: None,
            assignee: None,
            priority: 0,
            scheduled_for: None,
            notes: String::new(),
            items: Vec::new(),
            packages: Vec::new(),
            started_at: None,
            created_by: None,
            created_at: None,
            updated_by: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OperationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn folio(&self) -> &str {
        &self.folio
    }

    pub fn kind(&self) -> Option<OperationKind> {
        self.kind
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn origin(&self) -> Option<&OriginRef> {
        self.origin.as_ref()
    }

    pub fn source_location(&self) -> Option<LocationId> {
        self.source_location
    }

    pub fn destination_location(&self) -> Option<LocationId> {
        self.destination_location
    }

    pub fn assignee(&self) -> Option<UserId> {
        self.assignee
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.scheduled_for
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Notes are append-only; existing text is never overwritten.
    fn append_note_line(&mut self, line: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(line);
    }

    pub fn items(&self) -> &[OperationItem] {
        &self.items
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn item(&self, item_id: OperationItemId) -> Option<&OperationItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub(crate) fn item_mut(&mut self, item_id: OperationItemId) -> Option<&mut OperationItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    pub fn package(&self, package_id: PackageId) -> Option<&Package> {
        self.packages.iter().find(|package| package.id == package_id)
    }

    pub(crate) fn package_mut(&mut self, package_id: PackageId) -> Option<&mut Package> {
        self.packages
            .iter_mut()
            .find(|package| package.id == package_id)
    }

    /// Total quantity of one item placed into non-cancelled packages.
    pub fn packed_quantity(&self, item_id: OperationItemId) -> u64 {
        self.packages
            .iter()
            .filter(|package| package.state != PackageState::Cancelled)
            .map(|package| package.quantity_of(item_id))
            .sum()
    }

    /// Fulfilled quantity not yet claimed by any non-cancelled package.
    pub fn available_to_pack(&self, item_id: OperationItemId) -> u64 {
        let processed = self
            .item(item_id)
            .map(|item| item.processed)
            .unwrap_or_default();
        processed.saturating_sub(self.packed_quantity(item_id))
    }
}

impl AggregateRoot for FulfillmentOperation {
    type Id = OperationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOperation. Items are supplied up front; an operation never
/// gains or loses demand lines after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub branch_id: BranchId,
    pub kind: OperationKind,
    pub folio: String,
    pub origin: Option<OriginRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
    /// Lower values are more urgent.
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: String,
    pub items: Vec<ItemSpec>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignOperation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub assignee: UserId,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartOperation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProcessItems. The composite fulfillment action: a batch of
/// positive quantity deltas applied atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessItems {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub items: Vec<ItemProgress>,
    pub processed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelItem {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub item_id: OperationItemId,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOperation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub reason: String,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AppendNote. The one mutation allowed on terminal operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendNote {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub note: String,
    pub noted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationCommand {
    CreateOperation(CreateOperation),
    AssignOperation(AssignOperation),
    StartOperation(StartOperation),
    ProcessItems(ProcessItems),
    CancelItem(CancelItem),
    CancelOperation(CancelOperation),
    AppendNote(AppendNote),
    CreatePackage(CreatePackage),
    AddPackageItem(AddPackageItem),
    RemovePackageItem(RemovePackageItem),
    UpdatePackage(UpdatePackage),
    ClosePackage(ClosePackage),
    LabelPackage(LabelPackage),
    ShipPackage(ShipPackage),
    CancelPackage(CancelPackage),
}

/// Event: OperationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCreated {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub branch_id: BranchId,
    pub kind: OperationKind,
    pub folio: String,
    pub origin: Option<OriginRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: String,
    pub items: Vec<ItemSpec>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OperationAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationAssigned {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub assignee: UserId,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OperationStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStarted {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemProcessed. Carries the delta and the resulting total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProcessed {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub item_id: OperationItemId,
    pub quantity: u64,
    pub new_processed: u64,
    pub destination_location: Option<LocationId>,
    pub processed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCancelled {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub item_id: OperationItemId,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OperationCancelled. The cascade decision is part of the event:
/// the listed items and packages are the ones forced to `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCancelled {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub reason: String,
    pub cancelled_items: Vec<OperationItemId>,
    pub cancelled_packages: Vec<PackageId>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NoteAppended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteAppended {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub note: String,
    pub noted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationEvent {
    OperationCreated(OperationCreated),
    OperationAssigned(OperationAssigned),
    OperationStarted(OperationStarted),
    ItemProcessed(ItemProcessed),
    ItemCancelled(ItemCancelled),
    OperationCancelled(OperationCancelled),
    NoteAppended(NoteAppended),
    PackageCreated(PackageCreated),
    PackageItemAdded(PackageItemAdded),
    PackageItemRemoved(PackageItemRemoved),
    PackageUpdated(PackageUpdated),
    PackageClosed(PackageClosed),
    PackageLabeled(PackageLabeled),
    PackageShipped(PackageShipped),
    PackageCancelled(PackageCancelled),
}

impl Event for OperationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OperationEvent::OperationCreated(_) => "fulfillment.operation.created",
            OperationEvent::OperationAssigned(_) => "fulfillment.operation.assigned",
            OperationEvent::OperationStarted(_) => "fulfillment.operation.started",
            OperationEvent::ItemProcessed(_) => "fulfillment.operation.item_processed",
            OperationEvent::ItemCancelled(_) => "fulfillment.operation.item_cancelled",
            OperationEvent::OperationCancelled(_) => "fulfillment.operation.cancelled",
            OperationEvent::NoteAppended(_) => "fulfillment.operation.note_appended",
            OperationEvent::PackageCreated(_) => "fulfillment.package.created",
            OperationEvent::PackageItemAdded(_) => "fulfillment.package.item_added",
            OperationEvent::PackageItemRemoved(_) => "fulfillment.package.item_removed",
            OperationEvent::PackageUpdated(_) => "fulfillment.package.updated",
            OperationEvent::PackageClosed(_) => "fulfillment.package.closed",
            OperationEvent::PackageLabeled(_) => "fulfillment.package.labeled",
            OperationEvent::PackageShipped(_) => "fulfillment.package.shipped",
            OperationEvent::PackageCancelled(_) => "fulfillment.package.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OperationEvent::OperationCreated(e) => e.occurred_at,
            OperationEvent::OperationAssigned(e) => e.occurred_at,
            OperationEvent::OperationStarted(e) => e.occurred_at,
            OperationEvent::ItemProcessed(e) => e.occurred_at,
            OperationEvent::ItemCancelled(e) => e.occurred_at,
            OperationEvent::OperationCancelled(e) => e.occurred_at,
            OperationEvent::NoteAppended(e) => e.occurred_at,
            OperationEvent::PackageCreated(e) => e.occurred_at,
            OperationEvent::PackageItemAdded(e) => e.occurred_at,
            OperationEvent::PackageItemRemoved(e) => e.occurred_at,
            OperationEvent::PackageUpdated(e) => e.occurred_at,
            OperationEvent::PackageClosed(e) => e.occurred_at,
            OperationEvent::PackageLabeled(e) => e.occurred_at,
            OperationEvent::PackageShipped(e) => e.occurred_at,
            OperationEvent::PackageCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for FulfillmentOperation {
    type Command = OperationCommand;
    type Event = OperationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OperationEvent::OperationCreated(e) => {
                self.id = e.operation_id;
                self.tenant_id = Some(e.tenant_id);
                self.branch_id = Some(e.branch_id);
                self.folio = e.folio.clone();
                self.kind = Some(e.kind);
                self.state = OperationState::Draft;
                self.origin = e.origin.clone();
                self.source_location = e.source_location;
                self.destination_location = e.destination_location;
                self.priority = e.priority;
                self.scheduled_for = e.scheduled_for;
                self.notes = e.notes.clone();
                self.items = e.items.iter().map(OperationItem::from_spec).collect();
                self.packages.clear();
                self.started_at = None;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.updated_by = Some(e.created_by);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            OperationEvent::OperationAssigned(e) => {
                self.assignee = Some(e.assignee);
                if self.state == OperationState::Draft {
                    self.state = OperationState::Assigned;
                }
                self.updated_by = Some(e.assigned_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::OperationStarted(e) => {
                // The first start wins; later events never move the timestamp.
                if self.started_at.is_none() {
                    self.started_at = Some(e.occurred_at);
                }
                if self.assignee.is_none() {
                    self.assignee = Some(e.started_by);
                }
                self.state = OperationState::InProgress;
                self.updated_by = Some(e.started_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::ItemProcessed(e) => {
                if let Some(item) = self.item_mut(e.item_id) {
                    item.record_progress(
                        e.new_processed,
                        e.destination_location,
                        e.processed_by,
                        e.occurred_at,
                    );
                }
                if let Some(state) = OperationState::from_items(&self.items) {
                    self.state = state;
                }
                self.updated_by = Some(e.processed_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::ItemCancelled(e) => {
                if let Some(item) = self.item_mut(e.item_id) {
                    item.force_cancel();
                }
                if let Some(state) = OperationState::from_items(&self.items) {
                    self.state = state;
                }
                self.updated_by = Some(e.cancelled_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::OperationCancelled(e) => {
                for item_id in &e.cancelled_items {
                    if let Some(item) = self.item_mut(*item_id) {
                        item.force_cancel();
                    }
                }
                for package_id in &e.cancelled_packages {
                    if let Some(package) = self.package_mut(*package_id) {
                        package.state = PackageState::Cancelled;
                    }
                }
                self.append_note_line(&e.reason);
                self.state = OperationState::Cancelled;
                self.updated_by = Some(e.cancelled_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::NoteAppended(e) => {
                self.append_note_line(&e.note);
                self.updated_by = Some(e.noted_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageCreated(e) => {
                self.apply_package_created(e);
                self.updated_by = Some(e.created_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageItemAdded(e) => {
                self.apply_package_item_added(e);
                self.updated_by = Some(e.added_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageItemRemoved(e) => {
                self.apply_package_item_removed(e);
                self.updated_by = Some(e.removed_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageUpdated(e) => {
                self.apply_package_updated(e);
                self.updated_by = Some(e.updated_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageClosed(e) => {
                self.apply_package_closed(e);
                self.updated_by = Some(e.closed_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageLabeled(e) => {
                self.apply_package_labeled(e);
                self.updated_by = Some(e.labeled_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageShipped(e) => {
                self.apply_package_shipped(e);
                self.updated_by = Some(e.shipped_by);
                self.updated_at = Some(e.occurred_at);
            }
            OperationEvent::PackageCancelled(e) => {
                self.apply_package_cancelled(e);
                self.updated_by = Some(e.cancelled_by);
                self.updated_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OperationCommand::CreateOperation(cmd) => self.handle_create(cmd),
            OperationCommand::AssignOperation(cmd) => self.handle_assign(cmd),
            OperationCommand::StartOperation(cmd) => self.handle_start(cmd),
            OperationCommand::ProcessItems(cmd) => self.handle_process_items(cmd),
            OperationCommand::CancelItem(cmd) => self.handle_cancel_item(cmd),
            OperationCommand::CancelOperation(cmd) => self.handle_cancel(cmd),
            OperationCommand::AppendNote(cmd) => self.handle_append_note(cmd),
            OperationCommand::CreatePackage(cmd) => self.handle_create_package(cmd),
            OperationCommand::AddPackageItem(cmd) => self.handle_add_package_item(cmd),
            OperationCommand::RemovePackageItem(cmd) => self.handle_remove_package_item(cmd),
            OperationCommand::UpdatePackage(cmd) => self.handle_update_package(cmd),
            OperationCommand::ClosePackage(cmd) => self.handle_close_package(cmd),
            OperationCommand::LabelPackage(cmd) => self.handle_label_package(cmd),
            OperationCommand::ShipPackage(cmd) => self.handle_ship_package(cmd),
            OperationCommand::CancelPackage(cmd) => self.handle_cancel_package(cmd),
        }
    }
}

impl FulfillmentOperation {
    pub(crate) fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    pub(crate) fn ensure_operation_id(&self, operation_id: OperationId) -> Result<(), DomainError> {
        if self.id != operation_id {
            return Err(DomainError::invariant("operation_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOperation) -> Result<Vec<OperationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("operation already exists"));
        }

        if cmd.folio.trim().is_empty() {
            return Err(DomainError::validation("folio must not be empty"));
        }

        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "cannot create an operation without items",
            ));
        }

        for (index, spec) in cmd.items.iter().enumerate() {
            if spec.demanded == 0 {
                return Err(DomainError::validation(
                    "demanded quantity must be positive",
                ));
            }
            if cmd.items[..index]
                .iter()
                .any(|other| other.item_id == spec.item_id)
            {
                return Err(DomainError::validation("duplicate item id in operation"));
            }
        }

        Ok(vec![OperationEvent::OperationCreated(OperationCreated {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            branch_id: cmd.branch_id,
            kind: cmd.kind,
            folio: cmd.folio.clone(),
            origin: cmd.origin.clone(),
            source_location: cmd.source_location,
            destination_location: cmd.destination_location,
            priority: cmd.priority,
            scheduled_for: cmd.scheduled_for,
            notes: cmd.notes.clone(),
            items: cmd.items.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignOperation) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        if self.state.is_terminal() {
            return Err(DomainError::invariant("cannot assign a terminal operation"));
        }

        // Idempotent: re-assigning the current assignee changes nothing.
        if self.assignee == Some(cmd.assignee) {
            return Ok(vec![]);
        }

        Ok(vec![OperationEvent::OperationAssigned(OperationAssigned {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            assignee: cmd.assignee,
            assigned_by: cmd.assigned_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start(&self, cmd: &StartOperation) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        if self.state.is_terminal() {
            return Err(DomainError::invariant("cannot start a terminal operation"));
        }

        // Idempotent: a started operation stays started, and fulfillment may
        // already have pushed the state past in_progress.
        if self.started_at.is_some()
            || matches!(
                self.state,
                OperationState::InProgress | OperationState::Partial
            )
        {
            return Ok(vec![]);
        }

        Ok(vec![OperationEvent::OperationStarted(OperationStarted {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            started_by: cmd.started_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_process_items(&self, cmd: &ProcessItems) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "cannot process an empty item batch",
            ));
        }

        if self.state.is_terminal() {
            return Err(DomainError::invariant(
                "cannot process items on a terminal operation",
            ));
        }

        // Validate the whole batch against a working copy before emitting
        // anything: either every entry is applicable or none is. The copy
        // also makes repeated deltas for the same item accumulate correctly.
        let mut working = self.items.clone();
        let mut events = Vec::with_capacity(cmd.items.len());

        for progress in &cmd.items {
            let index = working
                .iter()
                .position(|item| item.id == progress.item_id)
                .ok_or(DomainError::NotFound)?;

            let new_processed = working[index].check_progress(progress.quantity)?;
            working[index].record_progress(
                new_processed,
                progress.destination_location,
                cmd.processed_by,
                cmd.occurred_at,
            );

            events.push(OperationEvent::ItemProcessed(ItemProcessed {
                tenant_id: cmd.tenant_id,
                operation_id: cmd.operation_id,
                item_id: progress.item_id,
                quantity: progress.quantity,
                new_processed,
                destination_location: progress.destination_location,
                processed_by: cmd.processed_by,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_cancel_item(&self, cmd: &CancelItem) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let item = self.item(cmd.item_id).ok_or(DomainError::NotFound)?;

        // Idempotent: re-cancelling a cancelled item is a no-op.
        if item.state == ItemState::Cancelled {
            return Ok(vec![]);
        }

        if item.state == ItemState::Completed {
            return Err(DomainError::validation("cannot cancel a completed item"));
        }

        if self.state.is_terminal() {
            return Err(DomainError::invariant(
                "cannot cancel items on a terminal operation",
            ));
        }

        Ok(vec![OperationEvent::ItemCancelled(ItemCancelled {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            item_id: cmd.item_id,
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOperation) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        // Idempotent: cancelling a cancelled operation is a no-op.
        if self.state == OperationState::Cancelled {
            return Ok(vec![]);
        }

        if self.state == OperationState::Completed {
            return Err(DomainError::invariant(
                "cannot cancel a completed operation",
            ));
        }

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation(
                "cancellation reason must not be empty",
            ));
        }

        let cancelled_items = self
            .items
            .iter()
            .filter(|item| !item.state.is_terminal())
            .map(|item| item.id)
            .collect();

        let cancelled_packages = self
            .packages
            .iter()
            .filter(|package| {
                matches!(package.state, PackageState::Open | PackageState::Closed)
            })
            .map(|package| package.id)
            .collect();

        Ok(vec![OperationEvent::OperationCancelled(OperationCancelled {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            reason: cmd.reason.clone(),
            cancelled_items,
            cancelled_packages,
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_append_note(&self, cmd: &AppendNote) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        if cmd.note.trim().is_empty() {
            return Err(DomainError::validation("note must not be empty"));
        }

        Ok(vec![OperationEvent::NoteAppended(NoteAppended {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            note: cmd.note.clone(),
            noted_by: cmd.noted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
