//! Document chain resolution and generation ports.
//!
//! A fulfillment operation may point at the document it was derived from
//! (a purchase order, a sale, or a predecessor operation). Walking those
//! pointers backwards yields the ultimate origin; every operation of the
//! tenant that walks back to the same origin belongs to one chain.

use std::collections::HashSet;

use thiserror::Error;

use wareflow_core::{AggregateId, BranchId, DomainError, TenantId, UserId};
use wareflow_operations::{OperationId, OriginKind, OriginRef};

use crate::projections::operations::OperationReadModel;
use crate::read_model::TenantStore;

/// A resolved document chain, root-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChain {
    /// Ultimate origin document. `None` when the chain starts at an
    /// operation created by hand; that operation is then first in
    /// `operations`.
    pub root: Option<OriginRef>,
    /// Every operation of the tenant reachable from the root, ordered by
    /// creation time.
    pub operations: Vec<OperationReadModel>,
}

/// Identity of a chain root, used to group operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootKey {
    Document(OriginKind, AggregateId),
    Operation(OperationId),
}

/// Read-only resolver over the operations read model.
///
/// Resolution never touches the event store: broken or cyclic origin
/// pointers degrade to a smaller chain instead of an error.
#[derive(Debug)]
pub struct ChainResolver<S> {
    store: S,
}

impl<S> ChainResolver<S>
where
    S: TenantStore<OperationId, OperationReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve the full chain the given operation belongs to.
    ///
    /// Fails with `NotFound` when the operation does not exist for the
    /// tenant (foreign-tenant targets look exactly like missing ones).
    pub fn resolve(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Result<DocumentChain, DomainError> {
        let target = self
            .store
            .get(tenant_id, operation_id)
            .ok_or_else(DomainError::not_found)?;

        let (root_key, root) = self.walk_to_root(tenant_id, &target);

        let mut operations: Vec<OperationReadModel> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|rm| self.walk_to_root(tenant_id, rm).0 == root_key)
            .collect();
        operations.sort_by_key(|rm| (rm.created_at, *rm.operation_id.0.as_uuid().as_bytes()));

        Ok(DocumentChain { root, operations })
    }

    /// Follow origin pointers until a non-operation document or an
    /// origin-less operation is reached. A visited set stops cycles; a
    /// dangling pointer makes the missing operation itself the root so the
    /// chain still groups deterministically.
    fn walk_to_root(
        &self,
        tenant_id: TenantId,
        start: &OperationReadModel,
    ) -> (RootKey, Option<OriginRef>) {
        let mut visited: HashSet<OperationId> = HashSet::new();
        visited.insert(start.operation_id);
        let mut current = start.clone();

        loop {
            match current.origin {
                Some(ref origin) if origin.kind == OriginKind::Operation => {
                    let next_id = OperationId(origin.origin_id);
                    if !visited.insert(next_id) {
                        return (RootKey::Operation(next_id), None);
                    }
                    match self.store.get(tenant_id, &next_id) {
                        Some(next) => current = next,
                        None => {
                            return (
                                RootKey::Document(OriginKind::Operation, origin.origin_id),
                                Some(origin.clone()),
                            );
                        }
                    }
                }
                Some(ref origin) => {
                    return (
                        RootKey::Document(origin.kind, origin.origin_id),
                        Some(origin.clone()),
                    );
                }
                None => return (RootKey::Operation(current.operation_id), None),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainGenerationError {
    #[error("origin document not found: {0}")]
    OriginNotFound(String),
    #[error("chain generation failed: {0}")]
    Failed(String),
}

/// Port for deriving a chain of fulfillment operations from a commercial
/// document. The engine forwards calls inside the tenant context and
/// returns the generated operation ids unchanged; what operations a
/// document expands into is decided behind this trait.
pub trait ChainGenerator: Send + Sync {
    fn from_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: AggregateId,
        branch_id: BranchId,
        requested_by: UserId,
    ) -> Result<Vec<OperationId>, ChainGenerationError>;

    fn from_sale(
        &self,
        tenant_id: TenantId,
        sale_id: AggregateId,
        branch_id: BranchId,
        requested_by: UserId,
    ) -> Result<Vec<OperationId>, ChainGenerationError>;
}

impl<T: ChainGenerator + ?Sized> ChainGenerator for std::sync::Arc<T> {
    fn from_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: AggregateId,
        branch_id: BranchId,
        requested_by: UserId,
    ) -> Result<Vec<OperationId>, ChainGenerationError> {
        (**self).from_purchase_order(tenant_id, purchase_order_id, branch_id, requested_by)
    }

    fn from_sale(
        &self,
        tenant_id: TenantId,
        sale_id: AggregateId,
        branch_id: BranchId,
        requested_by: UserId,
    ) -> Result<Vec<OperationId>, ChainGenerationError> {
        (**self).from_sale(tenant_id, sale_id, branch_id, requested_by)
    }
}
