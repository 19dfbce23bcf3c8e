//! Fulfillment operations domain module (event-sourced).
//!
//! This crate contains business rules for warehouse fulfillment operations
//! (receiving, picking, packing, shipping and the stages in between) and the
//! packages built on packing operations, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod item;
pub mod label;
pub mod operation;
pub mod packaging;

pub use item::{
    ItemProgress, ItemSpec, ItemState, LocationId, LotRef, OperationItem, OperationItemId,
    ProductId, SerialNumberId, VariantId,
};
pub use label::{PackingLabel, PackingLine};
pub use operation::{
    AppendNote, AssignOperation, CancelItem, CancelOperation, CreateOperation,
    FulfillmentOperation, ItemCancelled, ItemProcessed, NoteAppended, OperationAssigned,
    OperationCancelled, OperationCommand, OperationCreated, OperationEvent, OperationId,
    OperationKind, OperationStarted, OperationState, OriginKind, OriginRef, ProcessItems,
    StartOperation,
};
pub use packaging::{
    AddPackageItem, CancelPackage, ClosePackage, CreatePackage, Dimensions, LabelPackage,
    Package, PackageCancelled, PackageClosed, PackageCreated, PackageId, PackageItem,
    PackageItemAdded, PackageItemId, PackageItemRemoved, PackageLabeled, PackageShipped,
    PackageState, PackageUpdated, RemovePackageItem, ShipPackage, UpdatePackage,
};
