use wareflow_core::TenantId;

use crate::EventEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// Marks types that carry a tenant ID, so infrastructure consuming a mixed
/// stream (a bus subscription, a replay batch) can filter or cross-check
/// tenancy without knowing the payload type.
///
/// `EventEnvelope` implements this; other message types can opt in when they
/// need tenant scoping.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id()
    }
}
