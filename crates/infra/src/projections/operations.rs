use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use wareflow_core::{AggregateId, BranchId, TenantId, UserId};
use wareflow_events::EventEnvelope;
use wareflow_operations::{
    Dimensions, ItemState, LocationId, LotRef, OperationEvent, OperationId, OperationItemId,
    OperationKind, OperationState, OriginKind, OriginRef, PackageId, PackageItemId, PackageState,
    ProductId, SerialNumberId, VariantId,
};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::TenantStore;

/// One quantity of an operation item placed into a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLineReadModel {
    pub package_item_id: PackageItemId,
    pub operation_item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReadModel {
    pub package_id: PackageId,
    pub folio: String,
    pub state: PackageState,
    pub weight_grams: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub carrier: Option<String>,
    pub tracking_code: Option<String>,
    pub notes: String,
    pub lines: Vec<PackageLineReadModel>,
}

impl PackageReadModel {
    /// Total units across all lines.
    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// One line of demand, with the packing totals derived for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationItemReadModel {
    pub item_id: OperationItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub serial_id: Option<SerialNumberId>,
    pub demanded: u64,
    pub processed: u64,
    /// Quantity sitting in non-cancelled packages.
    pub packed: u64,
    /// Fulfilled quantity still available to pack.
    pub available: u64,
    pub state: ItemState,
    pub lot: Option<LotRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
}

/// Queryable fulfillment operation read model: header + items + packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReadModel {
    pub operation_id: OperationId,
    pub branch_id: BranchId,
    pub folio: String,
    pub kind: OperationKind,
    pub state: OperationState,
    pub origin: Option<OriginRef>,
    pub source_location: Option<LocationId>,
    pub destination_location: Option<LocationId>,
    pub assignee: Option<UserId>,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: String,
    pub items: Vec<OperationItemReadModel>,
    pub packages: Vec<PackageReadModel>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationReadModel {
    pub fn item(&self, item_id: OperationItemId) -> Option<&OperationItemReadModel> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    pub fn package(&self, package_id: PackageId) -> Option<&PackageReadModel> {
        self.packages
            .iter()
            .find(|package| package.package_id == package_id)
    }
}

/// Optional-filter query over the operations read model.
///
/// Every present field narrows the result; absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    pub branch_id: Option<BranchId>,
    pub kind: Option<OperationKind>,
    pub state: Option<OperationState>,
    pub assignee: Option<UserId>,
    pub origin_kind: Option<OriginKind>,
    pub origin_id: Option<AggregateId>,
    pub scheduled_from: Option<DateTime<Utc>>,
    pub scheduled_until: Option<DateTime<Utc>>,
    /// Keep operations at least this urgent (priority <= ceiling).
    pub priority_at_most: Option<i32>,
}

impl OperationFilter {
    pub fn matches(&self, rm: &OperationReadModel) -> bool {
        if let Some(branch_id) = self.branch_id {
            if rm.branch_id != branch_id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if rm.kind != kind {
                return false;
            }
        }
        if let Some(state) = self.state {
            if rm.state != state {
                return false;
            }
        }
        if let Some(assignee) = self.assignee {
            if rm.assignee != Some(assignee) {
                return false;
            }
        }
        if let Some(origin_kind) = self.origin_kind {
            if rm.origin.as_ref().map(|origin| origin.kind) != Some(origin_kind) {
                return false;
            }
        }
        if let Some(origin_id) = self.origin_id {
            if rm.origin.as_ref().map(|origin| origin.origin_id) != Some(origin_id) {
                return false;
            }
        }
        if let Some(from) = self.scheduled_from {
            match rm.scheduled_for {
                Some(scheduled) if scheduled >= from => {}
                _ => return false,
            }
        }
        if let Some(until) = self.scheduled_until {
            match rm.scheduled_for {
                Some(scheduled) if scheduled <= until => {}
                _ => return false,
            }
        }
        if let Some(ceiling) = self.priority_at_most {
            if rm.priority > ceiling {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum OperationProjectionError {
    #[error("failed to deserialize operation event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Fulfillment operations projection.
///
/// Consumes `fulfillment.operation` envelopes and maintains a tenant-isolated
/// read model of operation headers, items (with packing totals) and packages.
/// Idempotent for at-least-once delivery via per-stream cursors; fully
/// rebuildable from the event stream.
#[derive(Debug)]
pub struct OperationsProjection<S, C = InMemoryCursorStore>
where
    S: TenantStore<OperationId, OperationReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> OperationsProjection<S>
where
    S: TenantStore<OperationId, OperationReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "fulfillment.operations".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> OperationsProjection<S, C> {
        OperationsProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> OperationsProjection<S, C>
where
    S: TenantStore<OperationId, OperationReadModel>,
    C: ProjectionCursorStore + 'static,
{
    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store
                .get_cursor(tenant_id, aggregate_id, &self.projection_name)
                .unwrap_or(0)
        } else {
            match self.cursors.read() {
                Ok(cursors) => *cursors
                    .get(&CursorKey {
                        tenant_id,
                        aggregate_id,
                    })
                    .unwrap_or(&0),
                Err(_) => 0,
            }
        }
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                seq,
            );
        }
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.update_cursor(tenant_id, aggregate_id, &self.projection_name, seq);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.clear_cursors(tenant_id, &self.projection_name);
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        operation_id: &OperationId,
    ) -> Option<OperationReadModel> {
        self.store.get(tenant_id, operation_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<OperationReadModel> {
        self.store.list(tenant_id)
    }

    /// Filtered listing, most urgent first (priority, then scheduled date,
    /// unscheduled last, then creation time).
    pub fn query(&self, tenant_id: TenantId, filter: &OperationFilter) -> Vec<OperationReadModel> {
        let mut results: Vec<OperationReadModel> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|rm| filter.matches(rm))
            .collect();
        results.sort_by_key(urgency_key);
        results
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), OperationProjectionError> {
        if envelope.aggregate_type() != "fulfillment.operation" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(OperationProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(OperationProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: OperationEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OperationProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, operation_id) = event_scope(&ev);

        if event_tenant != tenant_id {
            return Err(OperationProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if operation_id.0 != aggregate_id {
            return Err(OperationProjectionError::TenantIsolation(
                "event operation_id does not match envelope aggregate_id".to_string(),
            ));
        }

        self.apply_event(tenant_id, operation_id, &ev);
        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn apply_event(&self, tenant_id: TenantId, operation_id: OperationId, ev: &OperationEvent) {
        match ev {
            OperationEvent::OperationCreated(e) => {
                let items = e
                    .items
                    .iter()
                    .map(|spec| OperationItemReadModel {
                        item_id: spec.item_id,
                        product_id: spec.product_id,
                        variant_id: spec.variant_id,
                        serial_id: spec.serial_id,
                        demanded: spec.demanded,
                        processed: 0,
                        packed: 0,
                        available: 0,
                        state: ItemState::Pending,
                        lot: spec.lot.clone(),
                        source_location: spec.source_location,
                        destination_location: spec.destination_location,
                    })
                    .collect();
                self.store.upsert(
                    tenant_id,
                    e.operation_id,
                    OperationReadModel {
                        operation_id: e.operation_id,
                        branch_id: e.branch_id,
                        folio: e.folio.clone(),
                        kind: e.kind,
                        state: OperationState::Draft,
                        origin: e.origin.clone(),
                        source_location: e.source_location,
                        destination_location: e.destination_location,
                        assignee: None,
                        priority: e.priority,
                        scheduled_for: e.scheduled_for,
                        notes: e.notes.clone(),
                        items,
                        packages: vec![],
                        started_at: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
                return;
            }
            _ => {}
        }

        // Every other event mutates an existing record; a missing record
        // means the created event was lost, and there is nothing to update.
        let Some(mut rm) = self.store.get(tenant_id, &operation_id) else {
            return;
        };

        match ev {
            OperationEvent::OperationCreated(_) => {}
            OperationEvent::OperationAssigned(e) => {
                rm.assignee = Some(e.assignee);
                if rm.state == OperationState::Draft {
                    rm.state = OperationState::Assigned;
                }
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::OperationStarted(e) => {
                if rm.started_at.is_none() {
                    rm.started_at = Some(e.occurred_at);
                }
                if rm.assignee.is_none() {
                    rm.assignee = Some(e.started_by);
                }
                rm.state = OperationState::InProgress;
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::ItemProcessed(e) => {
                if let Some(item) = rm.items.iter_mut().find(|item| item.item_id == e.item_id) {
                    item.processed = e.new_processed;
                    item.state = ItemState::from_quantities(item.processed, item.demanded);
                    item.available = item.processed.saturating_sub(item.packed);
                    if e.destination_location.is_some() {
                        item.destination_location = e.destination_location;
                    }
                }
                derive_operation_state(&mut rm);
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::ItemCancelled(e) => {
                if let Some(item) = rm.items.iter_mut().find(|item| item.item_id == e.item_id) {
                    item.state = ItemState::Cancelled;
                }
                derive_operation_state(&mut rm);
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::OperationCancelled(e) => {
                for item_id in &e.cancelled_items {
                    if let Some(item) = rm.items.iter_mut().find(|item| item.item_id == *item_id) {
                        item.state = ItemState::Cancelled;
                    }
                }
                for package_id in &e.cancelled_packages {
                    if let Some(package) = rm
                        .packages
                        .iter_mut()
                        .find(|package| package.package_id == *package_id)
                    {
                        package.state = PackageState::Cancelled;
                    }
                }
                append_note_line(&mut rm.notes, &e.reason);
                rm.state = OperationState::Cancelled;
                refresh_packed(&mut rm);
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::NoteAppended(e) => {
                append_note_line(&mut rm.notes, &e.note);
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageCreated(e) => {
                rm.packages.push(PackageReadModel {
                    package_id: e.package_id,
                    folio: e.folio.clone(),
                    state: PackageState::Open,
                    weight_grams: None,
                    dimensions: None,
                    carrier: None,
                    tracking_code: None,
                    notes: e.notes.clone().unwrap_or_default(),
                    lines: vec![],
                });
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageItemAdded(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    package.lines.push(PackageLineReadModel {
                        package_item_id: e.package_item_id,
                        operation_item_id: e.operation_item_id,
                        product_id: e.product_id,
                        variant_id: e.variant_id,
                        serial_id: e.serial_id,
                        quantity: e.quantity,
                    });
                }
                refresh_packed(&mut rm);
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageItemRemoved(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    package
                        .lines
                        .retain(|line| line.package_item_id != e.package_item_id);
                }
                refresh_packed(&mut rm);
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageUpdated(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    if let Some(weight) = e.weight_grams {
                        package.weight_grams = Some(weight);
                    }
                    if let Some(dimensions) = e.dimensions {
                        package.dimensions = Some(dimensions);
                    }
                    if let Some(ref notes) = e.notes {
                        package.notes = notes.clone();
                    }
                }
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageClosed(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    package.state = PackageState::Closed;
                }
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageLabeled(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    package.carrier = Some(e.carrier.clone());
                    package.tracking_code = Some(e.tracking_code.clone());
                    package.state = PackageState::Labeled;
                }
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageShipped(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    package.state = PackageState::Shipped;
                }
                rm.updated_at = e.occurred_at;
            }
            OperationEvent::PackageCancelled(e) => {
                if let Some(package) = rm
                    .packages
                    .iter_mut()
                    .find(|package| package.package_id == e.package_id)
                {
                    package.state = PackageState::Cancelled;
                    if let Some(ref reason) = e.reason {
                        append_note_line(&mut package.notes, reason);
                    }
                }
                refresh_packed(&mut rm);
                rm.updated_at = e.occurred_at;
            }
        }

        self.store.upsert(tenant_id, operation_id, rm);
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OperationProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.clear_cursors(t);
            }
        }

        // Deterministic replay order: tenant, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

fn event_scope(ev: &OperationEvent) -> (TenantId, OperationId) {
    match ev {
        OperationEvent::OperationCreated(e) => (e.tenant_id, e.operation_id),
        OperationEvent::OperationAssigned(e) => (e.tenant_id, e.operation_id),
        OperationEvent::OperationStarted(e) => (e.tenant_id, e.operation_id),
        OperationEvent::ItemProcessed(e) => (e.tenant_id, e.operation_id),
        OperationEvent::ItemCancelled(e) => (e.tenant_id, e.operation_id),
        OperationEvent::OperationCancelled(e) => (e.tenant_id, e.operation_id),
        OperationEvent::NoteAppended(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageCreated(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageItemAdded(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageItemRemoved(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageUpdated(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageClosed(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageLabeled(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageShipped(e) => (e.tenant_id, e.operation_id),
        OperationEvent::PackageCancelled(e) => (e.tenant_id, e.operation_id),
    }
}

/// Sort key shared by every urgency-ordered listing: lower priority value
/// first, scheduled operations before unscheduled, oldest first as the tie
/// breaker.
pub(crate) fn urgency_key(
    rm: &OperationReadModel,
) -> (i32, bool, Option<DateTime<Utc>>, DateTime<Utc>) {
    (
        rm.priority,
        rm.scheduled_for.is_none(),
        rm.scheduled_for,
        rm.created_at,
    )
}

/// Recompute per-item packed/available from the non-cancelled packages.
fn refresh_packed(rm: &mut OperationReadModel) {
    for item in &mut rm.items {
        let packed: u64 = rm
            .packages
            .iter()
            .filter(|package| package.state != PackageState::Cancelled)
            .flat_map(|package| package.lines.iter())
            .filter(|line| line.operation_item_id == item.item_id)
            .map(|line| line.quantity)
            .sum();
        item.packed = packed;
        item.available = item.processed.saturating_sub(packed);
    }
}

/// Re-derive the operation state from the item mix (same rule the aggregate
/// applies); `None` keeps the current state.
fn derive_operation_state(rm: &mut OperationReadModel) {
    if let Some(state) = OperationState::from_item_states(rm.items.iter().map(|item| item.state)) {
        rm.state = state;
    }
}

fn append_note_line(notes: &mut String, line: &str) {
    if !notes.is_empty() {
        notes.push('\n');
    }
    notes.push_str(line);
}
