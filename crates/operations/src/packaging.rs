//! Packaging sub-workflow: shippable containers assembled during packing.
//!
//! Packages live inside their owning operation but run their own lifecycle
//! (`open → closed → labeled → shipped`, cancel from `open`/`closed`). The
//! only valid input source is already-fulfilled item quantity; the available
//! pool for an item is `processed − Σ packed across non-cancelled packages`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{AggregateId, DomainError, Entity, TenantId, UserId, ValueObject};

use crate::item::{OperationItemId, ProductId, SerialNumberId, VariantId};
use crate::operation::{
    FulfillmentOperation, OperationEvent, OperationId, OperationKind,
};

/// Identifier of a package.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub AggregateId);

impl PackageId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PackageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a quantity placed into a package.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageItemId(pub AggregateId);

impl PackageItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PackageItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Package lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Open,
    Closed,
    Labeled,
    Shipped,
    Cancelled,
}

impl PackageState {
    /// Contents and attributes are frozen in every state but `Open`.
    pub fn is_frozen(self) -> bool {
        self != PackageState::Open
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PackageState::Shipped | PackageState::Cancelled)
    }
}

/// Outer dimensions of a package, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length_mm: u64,
    pub width_mm: u64,
    pub height_mm: u64,
}

impl Dimensions {
    pub fn volume_cm3(&self) -> u64 {
        // mm³ → cm³.
        self.length_mm
            .saturating_mul(self.width_mm)
            .saturating_mul(self.height_mm)
            / 1_000
    }
}

impl ValueObject for Dimensions {}

/// A quantity of one operation item placed into a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageItem {
    pub id: PackageItemId,
    pub operation_item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub quantity: u64,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl Entity for PackageItem {
    type Id = PackageItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A shipping container assembled during a packing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub folio: String,
    pub state: PackageState,
    pub weight_grams: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub carrier: Option<String>,
    pub tracking_code: Option<String>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub closed_by: Option<UserId>,
    pub closed_at: Option<DateTime<Utc>>,
    pub items: Vec<PackageItem>,
}

impl Package {
    pub fn is_open(&self) -> bool {
        self.state == PackageState::Open
    }

    /// Total quantity of one operation item inside this package.
    pub fn quantity_of(&self, item_id: OperationItemId) -> u64 {
        self.items
            .iter()
            .filter(|line| line.operation_item_id == item_id)
            .map(|line| line.quantity)
            .sum()
    }

    pub fn item(&self, package_item_id: PackageItemId) -> Option<&PackageItem> {
        self.items.iter().find(|line| line.id == package_item_id)
    }
}

impl Entity for Package {
    type Id = PackageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: CreatePackage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePackage {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub folio: String,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPackageItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPackageItem {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub package_item_id: PackageItemId,
    pub operation_item_id: OperationItemId,
    pub quantity: u64,
    /// Overrides the item's serial reference when packing serial-tracked stock.
    pub serial_id: Option<SerialNumberId>,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemovePackageItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePackageItem {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub package_item_id: PackageItemId,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePackage. Present fields replace, absent fields are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePackage {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub weight_grams: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub notes: Option<String>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClosePackage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePackage {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LabelPackage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPackage {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub carrier: String,
    pub tracking_code: String,
    pub labeled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipPackage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipPackage {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub shipped_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPackage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPackage {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCreated {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub folio: String,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageItemAdded {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub package_item_id: PackageItemId,
    pub operation_item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub quantity: u64,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageItemRemoved {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub package_item_id: PackageItemId,
    pub operation_item_id: OperationItemId,
    /// Quantity freed back to the item's available pool.
    pub quantity: u64,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpdated {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub weight_grams: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub notes: Option<String>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageClosed {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageLabeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLabeled {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub carrier: String,
    pub tracking_code: String,
    pub labeled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageShipped {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub shipped_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackageCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCancelled {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub package_id: PackageId,
    pub reason: Option<String>,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl FulfillmentOperation {
    pub(crate) fn handle_create_package(
        &self,
        cmd: &CreatePackage,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        if self.kind != Some(OperationKind::Packing) {
            return Err(DomainError::invariant(
                "packages can only be created on packing operations",
            ));
        }

        if self.state.is_terminal() {
            return Err(DomainError::invariant(
                "cannot create a package on a terminal operation",
            ));
        }

        if self.package(cmd.package_id).is_some() {
            return Err(DomainError::conflict("package already exists"));
        }

        if cmd.folio.trim().is_empty() {
            return Err(DomainError::validation("package folio must not be empty"));
        }

        Ok(vec![OperationEvent::PackageCreated(PackageCreated {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            folio: cmd.folio.clone(),
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_add_package_item(
        &self,
        cmd: &AddPackageItem,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;
        if !package.is_open() {
            return Err(DomainError::validation("package is not open"));
        }

        let item = self
            .item(cmd.operation_item_id)
            .ok_or(DomainError::NotFound)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let available = self.available_to_pack(cmd.operation_item_id);
        if cmd.quantity > available {
            return Err(DomainError::conflict(format!(
                "insufficient fulfilled quantity available to pack \
                 (requested {}, available {})",
                cmd.quantity, available
            )));
        }

        Ok(vec![OperationEvent::PackageItemAdded(PackageItemAdded {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            package_item_id: cmd.package_item_id,
            operation_item_id: cmd.operation_item_id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            serial_id: cmd.serial_id.or(item.serial_id),
            quantity: cmd.quantity,
            added_by: cmd.added_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_remove_package_item(
        &self,
        cmd: &RemovePackageItem,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;
        if !package.is_open() {
            return Err(DomainError::validation("package is not open"));
        }

        let line = package
            .item(cmd.package_item_id)
            .ok_or(DomainError::NotFound)?;

        Ok(vec![OperationEvent::PackageItemRemoved(PackageItemRemoved {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            package_item_id: cmd.package_item_id,
            operation_item_id: line.operation_item_id,
            quantity: line.quantity,
            removed_by: cmd.removed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_update_package(
        &self,
        cmd: &UpdatePackage,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;
        if package.state.is_frozen() {
            return Err(DomainError::validation(
                "cannot update a package that is not open",
            ));
        }

        if cmd.weight_grams.is_none() && cmd.dimensions.is_none() && cmd.notes.is_none() {
            // Nothing to change.
            return Ok(vec![]);
        }

        Ok(vec![OperationEvent::PackageUpdated(PackageUpdated {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            weight_grams: cmd.weight_grams,
            dimensions: cmd.dimensions,
            notes: cmd.notes.clone(),
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_close_package(
        &self,
        cmd: &ClosePackage,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;
        if !package.is_open() {
            return Err(DomainError::validation("package is not open"));
        }

        if package.items.is_empty() {
            return Err(DomainError::validation("cannot close an empty package"));
        }

        Ok(vec![OperationEvent::PackageClosed(PackageClosed {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            closed_by: cmd.closed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_label_package(
        &self,
        cmd: &LabelPackage,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;
        if package.state != PackageState::Closed {
            return Err(DomainError::validation(
                "package must be closed before labeling",
            ));
        }

        if cmd.carrier.trim().is_empty() {
            return Err(DomainError::validation("carrier must not be empty"));
        }
        if cmd.tracking_code.trim().is_empty() {
            return Err(DomainError::validation("tracking code must not be empty"));
        }

        Ok(vec![OperationEvent::PackageLabeled(PackageLabeled {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            carrier: cmd.carrier.clone(),
            tracking_code: cmd.tracking_code.clone(),
            labeled_by: cmd.labeled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_ship_package(
        &self,
        cmd: &ShipPackage,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;
        if !matches!(package.state, PackageState::Closed | PackageState::Labeled) {
            return Err(DomainError::validation(
                "package must be closed or labeled before shipping",
            ));
        }

        Ok(vec![OperationEvent::PackageShipped(PackageShipped {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            shipped_by: cmd.shipped_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn handle_cancel_package(
        &self,
        cmd: &CancelPackage,
    ) -> Result<Vec<OperationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_operation_id(cmd.operation_id)?;

        let package = self.package(cmd.package_id).ok_or(DomainError::NotFound)?;

        // Idempotent: re-cancelling is a no-op.
        if package.state == PackageState::Cancelled {
            return Ok(vec![]);
        }

        if !matches!(package.state, PackageState::Open | PackageState::Closed) {
            return Err(DomainError::validation(
                "only open or closed packages can be cancelled",
            ));
        }

        Ok(vec![OperationEvent::PackageCancelled(PackageCancelled {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            package_id: cmd.package_id,
            reason: cmd.reason.clone(),
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    pub(crate) fn apply_package_created(&mut self, e: &PackageCreated) {
        self.packages.push(Package {
            id: e.package_id,
            folio: e.folio.clone(),
            state: PackageState::Open,
            weight_grams: None,
            dimensions: None,
            carrier: None,
            tracking_code: None,
            notes: e.notes.clone(),
            created_by: e.created_by,
            created_at: e.occurred_at,
            closed_by: None,
            closed_at: None,
            items: Vec::new(),
        });
    }

    pub(crate) fn apply_package_item_added(&mut self, e: &PackageItemAdded) {
        if let Some(package) = self.package_mut(e.package_id) {
            package.items.push(PackageItem {
                id: e.package_item_id,
                operation_item_id: e.operation_item_id,
                product_id: e.product_id,
                variant_id: e.variant_id,
                serial_id: e.serial_id,
                quantity: e.quantity,
                added_by: e.added_by,
                added_at: e.occurred_at,
            });
        }
    }

    pub(crate) fn apply_package_item_removed(&mut self, e: &PackageItemRemoved) {
        if let Some(package) = self.package_mut(e.package_id) {
            package.items.retain(|line| line.id != e.package_item_id);
        }
    }

    pub(crate) fn apply_package_updated(&mut self, e: &PackageUpdated) {
        if let Some(package) = self.package_mut(e.package_id) {
            if let Some(weight) = e.weight_grams {
                package.weight_grams = Some(weight);
            }
            if let Some(dimensions) = e.dimensions {
                package.dimensions = Some(dimensions);
            }
            if let Some(notes) = &e.notes {
                package.notes = Some(notes.clone());
            }
        }
    }

    pub(crate) fn apply_package_closed(&mut self, e: &PackageClosed) {
        if let Some(package) = self.package_mut(e.package_id) {
            package.state = PackageState::Closed;
            package.closed_by = Some(e.closed_by);
            package.closed_at = Some(e.occurred_at);
        }
    }

    pub(crate) fn apply_package_labeled(&mut self, e: &PackageLabeled) {
        if let Some(package) = self.package_mut(e.package_id) {
            package.carrier = Some(e.carrier.clone());
            package.tracking_code = Some(e.tracking_code.clone());
            package.state = PackageState::Labeled;
        }
    }

    pub(crate) fn apply_package_shipped(&mut self, e: &PackageShipped) {
        if let Some(package) = self.package_mut(e.package_id) {
            package.state = PackageState::Shipped;
        }
    }

    pub(crate) fn apply_package_cancelled(&mut self, e: &PackageCancelled) {
        if let Some(package) = self.package_mut(e.package_id) {
            package.state = PackageState::Cancelled;
            if let Some(reason) = &e.reason {
                package.notes = Some(match package.notes.take() {
                    Some(notes) => format!("{notes}\n{reason}"),
                    None => reason.clone(),
                });
            }
        }
    }
}
