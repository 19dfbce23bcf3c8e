//! Packing label data assembly.
//!
//! A label is assembled as a pure view over one package of a fulfillment
//! operation: identity, physical attributes, shipping references and a
//! content summary. Rendering and carrier integration happen outside this
//! crate; callers get the data and print it however they print.

use wareflow_core::DomainError;

use crate::item::{OperationItemId, ProductId, SerialNumberId, VariantId};
use crate::operation::FulfillmentOperation;
use crate::packaging::{Dimensions, PackageId, PackageState};

/// One line of the label's content summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackingLine {
    pub operation_item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub quantity: u64,
}

/// Everything needed to print a label for one package.
///
/// The package folio doubles as the barcode payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackingLabel {
    pub package_folio: String,
    pub operation_folio: String,
    pub state: PackageState,
    pub weight_grams: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub volume_cm3: Option<u64>,
    pub carrier: Option<String>,
    pub tracking_code: Option<String>,
    pub lines: Vec<PackingLine>,
    pub total_units: u64,
    pub line_count: usize,
}

impl PackingLabel {
    /// Assemble the label for one package. Pure read, no mutation; fails
    /// with `NotFound` when the package does not exist on the operation.
    pub fn for_package(
        operation: &FulfillmentOperation,
        package_id: PackageId,
    ) -> Result<PackingLabel, DomainError> {
        let package = operation.package(package_id).ok_or(DomainError::NotFound)?;

        let lines: Vec<PackingLine> = package
            .items
            .iter()
            .map(|item| PackingLine {
                operation_item_id: item.operation_item_id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                serial_id: item.serial_id,
                quantity: item.quantity,
            })
            .collect();
        let total_units = lines.iter().map(|line| line.quantity).sum();
        let line_count = lines.len();

        Ok(PackingLabel {
            package_folio: package.folio.clone(),
            operation_folio: operation.folio().to_string(),
            state: package.state,
            weight_grams: package.weight_grams,
            dimensions: package.dimensions,
            volume_cm3: package.dimensions.map(|dimensions| dimensions.volume_cm3()),
            carrier: package.carrier.clone(),
            tracking_code: package.tracking_code.clone(),
            lines,
            total_units,
            line_count,
        })
    }
}
