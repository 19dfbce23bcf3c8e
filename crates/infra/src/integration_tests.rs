//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Commands produce events that update read models correctly
//! - Tenant isolation is preserved
//! - Optimistic concurrency conflicts are detected
//! - Projections stay idempotent and rebuildable

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use wareflow_core::{Aggregate, AggregateId, ExpectedVersion, TenantId, UserId};
    use wareflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use wareflow_operations::{
        AddPackageItem, CancelPackage, CreateOperation, CreatePackage, FulfillmentOperation,
        ItemProgress, ItemSpec, ItemState, OperationCommand, OperationId, OperationItemId,
        OperationKind, OperationState, OriginKind, OriginRef, PackageId, PackageItemId,
        PackageState, ProcessItems, ProductId, StartOperation,
    };

    use crate::chain::ChainResolver;
    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, PublishingEventStore, StoredEvent,
        UncommittedEvent,
    };
    use crate::projections::operations::{OperationReadModel, OperationsProjection};
    use crate::read_model::InMemoryTenantStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
    type Dispatcher = CommandDispatcher<InMemoryEventStore, Bus>;
    type ReadModelStore = Arc<InMemoryTenantStore<OperationId, OperationReadModel>>;
    type Projection = Arc<OperationsProjection<ReadModelStore>>;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_operation_id() -> OperationId {
        OperationId::new(AggregateId::new())
    }

    fn item_spec(demanded: u64) -> ItemSpec {
        ItemSpec {
            item_id: OperationItemId::new(AggregateId::new()),
            product_id: ProductId::new(AggregateId::new()),
            variant_id: None,
            serial_id: None,
            demanded,
            lot: None,
            source_location: None,
            destination_location: None,
        }
    }

    fn create_cmd(
        tenant_id: TenantId,
        operation_id: OperationId,
        kind: OperationKind,
        folio: &str,
        items: Vec<ItemSpec>,
    ) -> CreateOperation {
        CreateOperation {
            tenant_id,
            operation_id,
            branch_id: wareflow_core::BranchId::new(),
            kind,
            folio: folio.to_string(),
            origin: None,
            source_location: None,
            destination_location: None,
            priority: 0,
            scheduled_for: None,
            notes: String::new(),
            items,
            created_by: test_user_id(),
            occurred_at: Utc::now(),
        }
    }

    fn dispatch_op(
        dispatcher: &Dispatcher,
        tenant_id: TenantId,
        operation_id: OperationId,
        command: OperationCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        dispatcher.dispatch(
            tenant_id,
            operation_id.0,
            "fulfillment.operation",
            command,
            |_, id| FulfillmentOperation::empty(OperationId::new(id)),
        )
    }

    fn setup() -> (Dispatcher, Projection) {
        let store = InMemoryEventStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(store, bus.clone());
        let read_model_store: ReadModelStore = Arc::new(InMemoryTenantStore::new());
        let projection: Projection = Arc::new(OperationsProjection::new(read_model_store));

        // Subscribe to the bus BEFORE any events are published
        let projection_clone = projection.clone();
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus_clone.subscribe();
            let _ = ready_tx.send(());
            loop {
                match sub.recv() {
                    Ok(env) => {
                        if let Err(e) = projection_clone.apply_envelope(&env) {
                            eprintln!("Failed to apply envelope: {:?}", e);
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        // Ensure subscriber is ready before returning (prevents missing early events).
        let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

        (dispatcher, projection)
    }

    /// Helper: Wait a short time for events to be processed.
    /// The subscriber thread processes events synchronously.
    fn wait_for_processing() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    #[test]
    fn command_creates_operation_and_updates_read_model() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();

        let cmd = create_cmd(
            tenant_id,
            operation_id,
            OperationKind::Receiving,
            "RCV-000001",
            vec![item_spec(10), item_spec(5)],
        );

        let result = dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreateOperation(cmd),
        );

        assert!(result.is_ok());
        let stored_events = result.unwrap();
        assert_eq!(stored_events.len(), 1);
        assert_eq!(stored_events[0].sequence_number, 1);

        wait_for_processing();

        let rm = projection.get(tenant_id, &operation_id).unwrap();
        assert_eq!(rm.folio, "RCV-000001");
        assert_eq!(rm.kind, OperationKind::Receiving);
        assert_eq!(rm.state, OperationState::Draft);
        assert_eq!(rm.items.len(), 2);
        assert!(rm
            .items
            .iter()
            .all(|item| item.state == ItemState::Pending && item.available == 0));
    }

    #[test]
    fn fulfillment_flow_tracks_processed_and_available_quantities() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();
        let worker = test_user_id();

        let spec = item_spec(10);
        let item_id = spec.item_id;
        let cmd = create_cmd(
            tenant_id,
            operation_id,
            OperationKind::Picking,
            "PIK-000001",
            vec![spec],
        );
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreateOperation(cmd),
        )
        .unwrap();

        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::StartOperation(StartOperation {
                tenant_id,
                operation_id,
                started_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::ProcessItems(ProcessItems {
                tenant_id,
                operation_id,
                items: vec![ItemProgress {
                    item_id,
                    quantity: 6,
                    destination_location: None,
                }],
                processed_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        wait_for_processing();

        let rm = projection.get(tenant_id, &operation_id).unwrap();
        assert_eq!(rm.state, OperationState::InProgress);
        assert_eq!(rm.items[0].processed, 6);
        assert_eq!(rm.items[0].available, 6);
        assert_eq!(rm.items[0].state, ItemState::InProgress);
        assert_eq!(rm.assignee, Some(worker));

        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::ProcessItems(ProcessItems {
                tenant_id,
                operation_id,
                items: vec![ItemProgress {
                    item_id,
                    quantity: 4,
                    destination_location: None,
                }],
                processed_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        wait_for_processing();

        let rm = projection.get(tenant_id, &operation_id).unwrap();
        assert_eq!(rm.state, OperationState::Completed);
        assert_eq!(rm.items[0].processed, 10);
        assert_eq!(rm.items[0].state, ItemState::Completed);
    }

    #[test]
    fn rejected_command_leaves_the_read_model_unchanged() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();
        let worker = test_user_id();

        let spec = item_spec(5);
        let item_id = spec.item_id;
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreateOperation(create_cmd(
                tenant_id,
                operation_id,
                OperationKind::Receiving,
                "RCV-000001",
                vec![spec],
            )),
        )
        .unwrap();
        wait_for_processing();

        // Over-demand batch must be rejected as a whole.
        let result = dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::ProcessItems(ProcessItems {
                tenant_id,
                operation_id,
                items: vec![ItemProgress {
                    item_id,
                    quantity: 6,
                    destination_location: None,
                }],
                processed_by: worker,
                occurred_at: Utc::now(),
            }),
        );
        match result.unwrap_err() {
            DispatchError::Validation(_) => {}
            e => panic!("Expected Validation, got: {:?}", e),
        }

        wait_for_processing();

        let rm = projection.get(tenant_id, &operation_id).unwrap();
        assert_eq!(rm.items[0].processed, 0);
        assert_eq!(rm.state, OperationState::Draft);
    }

    #[test]
    fn tenant_isolation_preserved() {
        let (dispatcher, projection) = setup();
        let tenant1 = test_tenant_id();
        let tenant2 = test_tenant_id();
        let operation1_id = test_operation_id();
        let operation2_id = test_operation_id();

        dispatch_op(
            &dispatcher,
            tenant1,
            operation1_id,
            OperationCommand::CreateOperation(create_cmd(
                tenant1,
                operation1_id,
                OperationKind::Receiving,
                "RCV-000001",
                vec![item_spec(3)],
            )),
        )
        .unwrap();
        dispatch_op(
            &dispatcher,
            tenant2,
            operation2_id,
            OperationCommand::CreateOperation(create_cmd(
                tenant2,
                operation2_id,
                OperationKind::Picking,
                "PIK-000001",
                vec![item_spec(7)],
            )),
        )
        .unwrap();

        wait_for_processing();

        let tenant1_operations = projection.list(tenant1);
        assert_eq!(tenant1_operations.len(), 1);
        assert_eq!(tenant1_operations[0].operation_id, operation1_id);

        let tenant2_operations = projection.list(tenant2);
        assert_eq!(tenant2_operations.len(), 1);
        assert_eq!(tenant2_operations[0].operation_id, operation2_id);

        // Neither tenant can see the other's operation
        assert!(projection.get(tenant1, &operation2_id).is_none());
        assert!(projection.get(tenant2, &operation1_id).is_none());
    }

    #[test]
    fn foreign_tenant_commands_surface_as_not_found() {
        let (dispatcher, _projection) = setup();
        let owner = test_tenant_id();
        let intruder = test_tenant_id();
        let operation_id = test_operation_id();

        dispatch_op(
            &dispatcher,
            owner,
            operation_id,
            OperationCommand::CreateOperation(create_cmd(
                owner,
                operation_id,
                OperationKind::Receiving,
                "RCV-000001",
                vec![item_spec(3)],
            )),
        )
        .unwrap();

        // The intruder sees an empty stream, so the aggregate reports the
        // operation as missing rather than leaking its existence.
        let result = dispatch_op(
            &dispatcher,
            intruder,
            operation_id,
            OperationCommand::StartOperation(StartOperation {
                tenant_id: intruder,
                operation_id,
                started_by: test_user_id(),
                occurred_at: Utc::now(),
            }),
        );
        match result.unwrap_err() {
            DispatchError::NotFound => {}
            e => panic!("Expected NotFound, got: {:?}", e),
        }
    }

    #[test]
    fn stale_expected_version_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();

        let operation = FulfillmentOperation::empty(operation_id);
        let created = operation
            .handle(&OperationCommand::CreateOperation(create_cmd(
                tenant_id,
                operation_id,
                OperationKind::Receiving,
                "RCV-000001",
                vec![item_spec(4)],
            )))
            .unwrap();

        let uncommitted: Vec<UncommittedEvent> = created
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    operation_id.0,
                    "fulfillment.operation",
                    uuid::Uuid::now_v7(),
                    ev,
                )
                .unwrap()
            })
            .collect();

        store
            .append(uncommitted.clone(), ExpectedVersion::Exact(0))
            .unwrap();

        // A second writer that read version 0 must lose.
        let result = store.append(uncommitted, ExpectedVersion::Exact(0));
        match result.unwrap_err() {
            EventStoreError::Conflict(_) => {}
            e => panic!("Expected Conflict, got: {:?}", e),
        }
    }

    #[test]
    fn duplicate_envelopes_are_ignored_by_the_projection() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();

        let stored = dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreateOperation(create_cmd(
                tenant_id,
                operation_id,
                OperationKind::Receiving,
                "RCV-000001",
                vec![item_spec(10)],
            )),
        )
        .unwrap();
        wait_for_processing();

        // Redeliver the same envelope; the cursor swallows it.
        projection.apply_envelope(&stored[0].to_envelope()).unwrap();
        projection.apply_envelope(&stored[0].to_envelope()).unwrap();

        let operations = projection.list(tenant_id);
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].items[0].processed, 0);
    }

    #[test]
    fn rebuild_from_scratch_reproduces_the_read_model() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();
        let worker = test_user_id();

        let spec = item_spec(8);
        let item_id = spec.item_id;
        let mut all_events = dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreateOperation(create_cmd(
                tenant_id,
                operation_id,
                OperationKind::Putaway,
                "PUT-000001",
                vec![spec],
            )),
        )
        .unwrap();
        all_events.extend(
            dispatch_op(
                &dispatcher,
                tenant_id,
                operation_id,
                OperationCommand::StartOperation(StartOperation {
                    tenant_id,
                    operation_id,
                    started_by: worker,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap(),
        );
        all_events.extend(
            dispatch_op(
                &dispatcher,
                tenant_id,
                operation_id,
                OperationCommand::ProcessItems(ProcessItems {
                    tenant_id,
                    operation_id,
                    items: vec![ItemProgress {
                        item_id,
                        quantity: 8,
                        destination_location: None,
                    }],
                    processed_by: worker,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap(),
        );
        wait_for_processing();

        let live = projection.get(tenant_id, &operation_id).unwrap();

        let rebuilt_store: ReadModelStore = Arc::new(InMemoryTenantStore::new());
        let rebuilt = OperationsProjection::new(rebuilt_store);
        rebuilt
            .rebuild_from_scratch(all_events.iter().map(|e| e.to_envelope()))
            .unwrap();

        assert_eq!(rebuilt.get(tenant_id, &operation_id).unwrap(), live);
    }

    #[test]
    fn publishing_event_store_publishes_each_committed_event() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let store = PublishingEventStore::new(InMemoryEventStore::new(), bus);

        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();

        let operation = FulfillmentOperation::empty(operation_id);
        let created = operation
            .handle(&OperationCommand::CreateOperation(create_cmd(
                tenant_id,
                operation_id,
                OperationKind::Shipping,
                "SHP-000001",
                vec![item_spec(2)],
            )))
            .unwrap();
        let uncommitted: Vec<UncommittedEvent> = created
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    operation_id.0,
                    "fulfillment.operation",
                    uuid::Uuid::now_v7(),
                    ev,
                )
                .unwrap()
            })
            .collect();

        let committed = store
            .append(uncommitted.clone(), ExpectedVersion::Exact(0))
            .unwrap();
        assert_eq!(committed.len(), 1);

        let envelope = sub
            .recv_timeout(std::time::Duration::from_secs(1))
            .unwrap();
        assert_eq!(envelope.sequence_number(), 1);
        assert_eq!(envelope.aggregate_id(), operation_id.0);

        // A failed append publishes nothing.
        let result = store.append(uncommitted, ExpectedVersion::Exact(0));
        assert!(result.is_err());
        assert!(sub
            .recv_timeout(std::time::Duration::from_millis(100))
            .is_err());
    }

    #[test]
    fn packaging_updates_packed_and_available_quantities() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let operation_id = test_operation_id();
        let worker = test_user_id();

        let spec = item_spec(10);
        let item_id = spec.item_id;
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreateOperation(create_cmd(
                tenant_id,
                operation_id,
                OperationKind::Packing,
                "PAK-000001",
                vec![spec],
            )),
        )
        .unwrap();
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::StartOperation(StartOperation {
                tenant_id,
                operation_id,
                started_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::ProcessItems(ProcessItems {
                tenant_id,
                operation_id,
                items: vec![ItemProgress {
                    item_id,
                    quantity: 6,
                    destination_location: None,
                }],
                processed_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let package_id = PackageId::new(AggregateId::new());
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CreatePackage(CreatePackage {
                tenant_id,
                operation_id,
                package_id,
                folio: "PKG-000001".to_string(),
                notes: None,
                created_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::AddPackageItem(AddPackageItem {
                tenant_id,
                operation_id,
                package_id,
                package_item_id: PackageItemId::new(AggregateId::new()),
                operation_item_id: item_id,
                quantity: 4,
                serial_id: None,
                added_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        wait_for_processing();

        let rm = projection.get(tenant_id, &operation_id).unwrap();
        assert_eq!(rm.items[0].processed, 6);
        assert_eq!(rm.items[0].packed, 4);
        assert_eq!(rm.items[0].available, 2);
        assert_eq!(rm.packages.len(), 1);
        assert_eq!(rm.packages[0].total_units(), 4);

        // Cancelling the package returns its quantity to the pool.
        dispatch_op(
            &dispatcher,
            tenant_id,
            operation_id,
            OperationCommand::CancelPackage(CancelPackage {
                tenant_id,
                operation_id,
                package_id,
                reason: Some("box damaged".to_string()),
                cancelled_by: worker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        wait_for_processing();

        let rm = projection.get(tenant_id, &operation_id).unwrap();
        assert_eq!(rm.packages[0].state, PackageState::Cancelled);
        assert_eq!(rm.items[0].packed, 0);
        assert_eq!(rm.items[0].available, 6);
    }

    #[test]
    fn workboards_follow_the_event_stream() {
        let (dispatcher, projection) = setup();
        let tenant_id = test_tenant_id();
        let branch_id = wareflow_core::BranchId::new();

        let urgent_id = test_operation_id();
        let mut urgent = create_cmd(
            tenant_id,
            urgent_id,
            OperationKind::Picking,
            "PIK-000001",
            vec![item_spec(4)],
        );
        urgent.branch_id = branch_id;
        urgent.priority = 1;
        dispatch_op(
            &dispatcher,
            tenant_id,
            urgent_id,
            OperationCommand::CreateOperation(urgent),
        )
        .unwrap();

        let routine_id = test_operation_id();
        let mut routine = create_cmd(
            tenant_id,
            routine_id,
            OperationKind::Receiving,
            "RCV-000001",
            vec![item_spec(9)],
        );
        routine.branch_id = branch_id;
        routine.priority = 5;
        dispatch_op(
            &dispatcher,
            tenant_id,
            routine_id,
            OperationCommand::CreateOperation(routine),
        )
        .unwrap();

        wait_for_processing();

        let pending = projection.pending(tenant_id, branch_id);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].operation_id, urgent_id);

        let stats = projection.statistics(tenant_id, branch_id);
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.open_operations, 2);
        assert_eq!(stats.items_demanded, 13);

        let board = projection.kanban(tenant_id, branch_id);
        let draft_column = board
            .columns
            .iter()
            .find(|column| column.state == OperationState::Draft)
            .unwrap();
        assert_eq!(draft_column.cards.len(), 2);
        assert_eq!(draft_column.cards[0].folio, "PIK-000001");
    }

    #[test]
    fn chain_resolution_over_projected_operations() {
        let store = InMemoryEventStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(store, bus);
        let read_model_store: ReadModelStore = Arc::new(InMemoryTenantStore::new());
        let projection = OperationsProjection::new(read_model_store.clone());
        let resolver = ChainResolver::new(read_model_store);

        let tenant_id = test_tenant_id();
        let purchase_order = OriginRef {
            kind: OriginKind::PurchaseOrder,
            origin_id: AggregateId::new(),
            origin_folio: Some("PO-000007".to_string()),
        };

        let receiving_id = test_operation_id();
        let mut receiving = create_cmd(
            tenant_id,
            receiving_id,
            OperationKind::Receiving,
            "RCV-000001",
            vec![item_spec(12)],
        );
        receiving.origin = Some(purchase_order.clone());
        let receiving_events = dispatch_op(
            &dispatcher,
            tenant_id,
            receiving_id,
            OperationCommand::CreateOperation(receiving),
        )
        .unwrap();

        let putaway_id = test_operation_id();
        let mut putaway = create_cmd(
            tenant_id,
            putaway_id,
            OperationKind::Putaway,
            "PUT-000001",
            vec![item_spec(12)],
        );
        putaway.origin = Some(OriginRef {
            kind: OriginKind::Operation,
            origin_id: receiving_id.0,
            origin_folio: Some("RCV-000001".to_string()),
        });
        let putaway_events = dispatch_op(
            &dispatcher,
            tenant_id,
            putaway_id,
            OperationCommand::CreateOperation(putaway),
        )
        .unwrap();

        // Feed the projection directly; this test has no subscriber thread.
        for stored in receiving_events.iter().chain(putaway_events.iter()) {
            projection.apply_envelope(&stored.to_envelope()).unwrap();
        }

        let chain = resolver.resolve(tenant_id, &putaway_id).unwrap();
        assert_eq!(chain.root, Some(purchase_order));
        let folios: Vec<&str> = chain
            .operations
            .iter()
            .map(|rm| rm.folio.as_str())
            .collect();
        assert_eq!(folios, vec!["RCV-000001", "PUT-000001"]);
    }
}
