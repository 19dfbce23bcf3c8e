//! Packing progress views assembled from the operations read model.
//!
//! These are per-request shapes, not stored projections: each is computed
//! from one `OperationReadModel` at read time. The full label document is
//! different, it is rebuilt from the event stream (see
//! `FulfillmentEngine::packing_label`).

use wareflow_infra::projections::{OperationReadModel, PackageReadModel};
use wareflow_operations::{
    ItemState, OperationId, OperationItemId, PackageId, PackageState, ProductId, VariantId,
};

/// One package of an operation, condensed to its shipping-desk essentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub package_id: PackageId,
    pub folio: String,
    pub state: PackageState,
    pub total_units: u64,
    pub line_count: usize,
    pub weight_grams: Option<u64>,
    pub carrier: Option<String>,
    pub tracking_code: Option<String>,
}

impl PackageSummary {
    fn from_read_model(package: &PackageReadModel) -> Self {
        Self {
            package_id: package.package_id,
            folio: package.folio.clone(),
            state: package.state,
            total_units: package.total_units(),
            line_count: package.lines.len(),
            weight_grams: package.weight_grams,
            carrier: package.carrier.clone(),
            tracking_code: package.tracking_code.clone(),
        }
    }
}

/// Packing progress of one operation.
///
/// Cancelled packages stay in the list (their state says so) but do not
/// count toward `package_count`; their former contents are already back in
/// the available pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackingSummary {
    pub operation_id: OperationId,
    pub folio: String,
    /// Packages that still hold quantity (open, closed, labeled or shipped).
    pub package_count: usize,
    /// Units sitting in non-cancelled packages.
    pub packed_units: u64,
    /// Fulfilled units not yet in any package.
    pub unpacked_units: u64,
    pub packages: Vec<PackageSummary>,
}

impl PackingSummary {
    pub fn for_operation(rm: &OperationReadModel) -> Self {
        let package_count = rm
            .packages
            .iter()
            .filter(|package| package.state != PackageState::Cancelled)
            .count();
        let packed_units = rm.items.iter().map(|item| item.packed).sum();
        let unpacked_units = rm
            .items
            .iter()
            .filter(|item| item.state != ItemState::Cancelled)
            .map(|item| item.available)
            .sum();

        Self {
            operation_id: rm.operation_id,
            folio: rm.folio.clone(),
            package_count,
            packed_units,
            unpacked_units,
            packages: rm.packages.iter().map(PackageSummary::from_read_model).collect(),
        }
    }
}

/// An item with fulfilled quantity still free to pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableItem {
    pub item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub demanded: u64,
    pub processed: u64,
    pub packed: u64,
    pub available: u64,
}

impl AvailableItem {
    /// Items of `rm` that can still go into a package. Cancelled and fully
    /// packed items are omitted.
    pub fn for_operation(rm: &OperationReadModel) -> Vec<AvailableItem> {
        rm.items
            .iter()
            .filter(|item| item.state != ItemState::Cancelled && item.available > 0)
            .map(|item| AvailableItem {
                item_id: item.item_id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                demanded: item.demanded,
                processed: item.processed,
                packed: item.packed,
                available: item.available,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use wareflow_core::{AggregateId, BranchId};
    use wareflow_infra::projections::{OperationItemReadModel, PackageLineReadModel};
    use wareflow_operations::{OperationKind, OperationState, PackageItemId};

    fn item(demanded: u64, processed: u64, packed: u64, state: ItemState) -> OperationItemReadModel {
        OperationItemReadModel {
            item_id: OperationItemId::new(AggregateId::new()),
            product_id: ProductId::new(AggregateId::new()),
            variant_id: None,
            serial_id: None,
            demanded,
            processed,
            packed,
            available: processed - packed,
            state,
            lot: None,
            source_location: None,
            destination_location: None,
        }
    }

    fn package(folio: &str, state: PackageState, quantities: &[u64]) -> PackageReadModel {
        let lines = quantities
            .iter()
            .map(|&quantity| PackageLineReadModel {
                package_item_id: PackageItemId::new(AggregateId::new()),
                operation_item_id: OperationItemId::new(AggregateId::new()),
                product_id: ProductId::new(AggregateId::new()),
                variant_id: None,
                serial_id: None,
                quantity,
            })
            .collect();
        PackageReadModel {
            package_id: PackageId::new(AggregateId::new()),
            folio: folio.to_string(),
            state,
            weight_grams: None,
            dimensions: None,
            carrier: None,
            tracking_code: None,
            notes: String::new(),
            lines,
        }
    }

    fn packing_operation(
        items: Vec<OperationItemReadModel>,
        packages: Vec<PackageReadModel>,
    ) -> OperationReadModel {
        let now = Utc::now();
        OperationReadModel {
            operation_id: OperationId::new(AggregateId::new()),
            branch_id: BranchId::new(),
            folio: "PAK-000004".to_string(),
            kind: OperationKind::Packing,
            state: OperationState::InProgress,
            origin: None,
            source_location: None,
            destination_location: None,
            assignee: None,
            priority: 2,
            scheduled_for: None,
            notes: String::new(),
            items,
            packages,
            started_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn summary_splits_packed_and_unpacked_units() {
        let rm = packing_operation(
            vec![
                item(10, 10, 6, ItemState::Completed),
                item(5, 3, 0, ItemState::InProgress),
            ],
            vec![package("PKG-000001", PackageState::Closed, &[6])],
        );

        let summary = PackingSummary::for_operation(&rm);
        assert_eq!(summary.folio, "PAK-000004");
        assert_eq!(summary.package_count, 1);
        assert_eq!(summary.packed_units, 6);
        assert_eq!(summary.unpacked_units, 7);
        assert_eq!(summary.packages.len(), 1);
        assert_eq!(summary.packages[0].total_units, 6);
        assert_eq!(summary.packages[0].line_count, 1);
    }

    #[test]
    fn cancelled_packages_are_listed_but_not_counted() {
        let rm = packing_operation(
            vec![item(10, 10, 4, ItemState::Completed)],
            vec![
                package("PKG-000001", PackageState::Open, &[4]),
                package("PKG-000002", PackageState::Cancelled, &[]),
            ],
        );

        let summary = PackingSummary::for_operation(&rm);
        assert_eq!(summary.package_count, 1);
        assert_eq!(summary.packages.len(), 2);
        assert_eq!(summary.packages[1].state, PackageState::Cancelled);
        assert_eq!(summary.packages[1].total_units, 0);
    }

    #[test]
    fn cancelled_items_do_not_report_unpacked_quantity() {
        let rm = packing_operation(
            vec![
                item(10, 10, 2, ItemState::Completed),
                item(8, 4, 0, ItemState::Cancelled),
            ],
            vec![package("PKG-000001", PackageState::Open, &[2])],
        );

        let summary = PackingSummary::for_operation(&rm);
        assert_eq!(summary.packed_units, 2);
        assert_eq!(summary.unpacked_units, 8);
    }

    #[test]
    fn available_items_skip_cancelled_and_exhausted_lines() {
        let ready = item(10, 10, 4, ItemState::Completed);
        let exhausted = item(5, 5, 5, ItemState::Completed);
        let cancelled = item(6, 2, 0, ItemState::Cancelled);
        let untouched = item(3, 0, 0, ItemState::Pending);
        let ready_id = ready.item_id;

        let rm = packing_operation(vec![ready, exhausted, cancelled, untouched], vec![]);

        let available = AvailableItem::for_operation(&rm);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].item_id, ready_id);
        assert_eq!(available[0].available, 6);
        assert_eq!(available[0].packed, 4);
    }
}
