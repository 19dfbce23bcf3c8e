//! Human-readable document numbering.
//!
//! Every operation and package carries a folio such as `RCV-000001` that
//! floor staff use to talk about the document. Folios are assigned once at
//! creation time and never change.

use std::collections::HashMap;
use std::sync::RwLock;

use wareflow_core::TenantId;
use wareflow_operations::OperationKind;

/// What kind of document a folio is being issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolioKind {
    Operation(OperationKind),
    Package,
}

impl FolioKind {
    pub fn prefix(self) -> &'static str {
        match self {
            FolioKind::Operation(OperationKind::Receiving) => "RCV",
            FolioKind::Operation(OperationKind::QualityControl) => "QC",
            FolioKind::Operation(OperationKind::Putaway) => "PUT",
            FolioKind::Operation(OperationKind::Picking) => "PIK",
            FolioKind::Operation(OperationKind::Packing) => "PAK",
            FolioKind::Operation(OperationKind::Shipping) => "SHP",
            FolioKind::Operation(OperationKind::Manual) => "MAN",
            FolioKind::Package => "PKG",
        }
    }
}

/// Port for folio allocation.
///
/// Implementations must return folios that are unique per tenant and kind
/// and monotonically increasing; the engine calls this once per created
/// document, before dispatching the creation command.
pub trait FolioGenerator: Send + Sync {
    fn next(&self, tenant_id: TenantId, kind: FolioKind) -> String;
}

impl<T: FolioGenerator + ?Sized> FolioGenerator for std::sync::Arc<T> {
    fn next(&self, tenant_id: TenantId, kind: FolioKind) -> String {
        (**self).next(tenant_id, kind)
    }
}

/// In-memory sequential allocator (`RCV-000001`, `RCV-000002`, ...).
///
/// Counters reset with the process; deployments that need durable folios
/// put a persistent implementation behind the same trait.
#[derive(Debug, Default)]
pub struct SequentialFolioGenerator {
    sequences: RwLock<HashMap<(TenantId, &'static str), u64>>,
}

impl SequentialFolioGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FolioGenerator for SequentialFolioGenerator {
    fn next(&self, tenant_id: TenantId, kind: FolioKind) -> String {
        let prefix = kind.prefix();
        let mut sequences = match self.sequences.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = sequences.entry((tenant_id, prefix)).or_insert(0);
        *seq += 1;
        format!("{prefix}-{seq:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folios_are_sequential_per_tenant_and_kind() {
        let generator = SequentialFolioGenerator::new();
        let tenant_id = TenantId::new();

        assert_eq!(
            generator.next(tenant_id, FolioKind::Operation(OperationKind::Receiving)),
            "RCV-000001"
        );
        assert_eq!(
            generator.next(tenant_id, FolioKind::Operation(OperationKind::Receiving)),
            "RCV-000002"
        );
        assert_eq!(
            generator.next(tenant_id, FolioKind::Operation(OperationKind::Picking)),
            "PIK-000001"
        );
        assert_eq!(generator.next(tenant_id, FolioKind::Package), "PKG-000001");
    }

    #[test]
    fn tenants_do_not_share_sequences() {
        let generator = SequentialFolioGenerator::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        assert_eq!(
            generator.next(tenant_a, FolioKind::Operation(OperationKind::Packing)),
            "PAK-000001"
        );
        assert_eq!(
            generator.next(tenant_a, FolioKind::Operation(OperationKind::Packing)),
            "PAK-000002"
        );
        assert_eq!(
            generator.next(tenant_b, FolioKind::Operation(OperationKind::Packing)),
            "PAK-000001"
        );
    }

    #[test]
    fn every_kind_has_a_distinct_prefix() {
        let kinds = [
            FolioKind::Operation(OperationKind::Receiving),
            FolioKind::Operation(OperationKind::QualityControl),
            FolioKind::Operation(OperationKind::Putaway),
            FolioKind::Operation(OperationKind::Picking),
            FolioKind::Operation(OperationKind::Packing),
            FolioKind::Operation(OperationKind::Shipping),
            FolioKind::Operation(OperationKind::Manual),
            FolioKind::Package,
        ];
        let mut prefixes: Vec<&str> = kinds.iter().map(|kind| kind.prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), kinds.len());
    }
}
