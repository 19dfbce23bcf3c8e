use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use wareflow_core::{AggregateId, BranchId, TenantId, UserId};
use wareflow_events::EventEnvelope;
use wareflow_events::InMemoryEventBus;
use wareflow_infra::command_dispatcher::CommandDispatcher;
use wareflow_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use wareflow_infra::projections::operations::{OperationReadModel, OperationsProjection};
use wareflow_infra::read_model::InMemoryTenantStore;
use wareflow_operations::{
    CreateOperation, FulfillmentOperation, ItemProcessed, ItemProgress, ItemSpec, NoteAppended,
    OperationCommand, OperationCreated, OperationEvent, OperationId, OperationItemId,
    OperationKind, ProcessItems, ProductId,
};

/// Naive CRUD simulation: direct key-value updates (no events, no history).
#[derive(Debug, Clone)]
struct NaiveCrudStore {
    inner: Arc<RwLock<HashMap<(TenantId, AggregateId), CrudState>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CrudState {
    folio: String,
    demanded: u64,
    processed: u64,
    version: u64, // For optimistic concurrency (not used in benchmarks)
}

impl NaiveCrudStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn create(&self, tenant_id: TenantId, operation_id: AggregateId, folio: String, demanded: u64) {
        let mut map = self.inner.write().unwrap();
        map.insert(
            (tenant_id, operation_id),
            CrudState {
                folio,
                demanded,
                processed: 0,
                version: 1,
            },
        );
    }

    fn process(&self, tenant_id: TenantId, operation_id: AggregateId, delta: u64) -> Result<(), ()> {
        let mut map = self.inner.write().unwrap();
        if let Some(state) = map.get_mut(&(tenant_id, operation_id)) {
            let new_processed = state.processed + delta;
            if new_processed > state.demanded {
                return Err(());
            }
            state.processed = new_processed;
            state.version += 1;
            Ok(())
        } else {
            Err(())
        }
    }
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
    folio: &str,
    items: Vec<ItemSpec>,
) -> CreateOperation {
    CreateOperation {
        tenant_id,
        operation_id,
        branch_id: BranchId::new(),
        kind: OperationKind::Picking,
        folio: folio.to_string(),
        origin: None,
        source_location: None,
        destination_location: None,
        priority: 0,
        scheduled_for: None,
        notes: String::new(),
        items,
        created_by: UserId::new(),
        occurred_at: Utc::now(),
    }
}

fn setup_event_sourcing() -> (
    CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>,
    TenantId,
) {
    let store = InMemoryEventStore::new();
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(store, bus);
    let tenant_id = TenantId::new();
    (dispatcher, tenant_id)
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(1000);

    // Benchmark: CreateOperation command (first command, no history)
    group.bench_function("create_operation_fresh", |b| {
        let (dispatcher, tenant_id) = setup_event_sourcing();
        b.iter(|| {
            let operation_id = OperationId::new(AggregateId::new());
            let cmd = create_cmd(
                tenant_id,
                operation_id,
                black_box("PIK-000001"),
                vec![item_spec(100)],
            );
            dispatcher
                .dispatch(
                    tenant_id,
                    operation_id.0,
                    "fulfillment.operation",
                    OperationCommand::CreateOperation(cmd),
                    |_, id| FulfillmentOperation::empty(OperationId::new(id)),
                )
                .unwrap();
        });
    });

    // Benchmark: ProcessItems command after creation (with growing history)
    group.bench_function("process_items_with_history", |b| {
        let (dispatcher, tenant_id) = setup_event_sourcing();
        let operation_id = OperationId::new(AggregateId::new());
        let spec = item_spec(u64::MAX);
        let item_id = spec.item_id;
        let worker = UserId::new();

        dispatcher
            .dispatch(
                tenant_id,
                operation_id.0,
                "fulfillment.operation",
                OperationCommand::CreateOperation(create_cmd(
                    tenant_id,
                    operation_id,
                    "PIK-000001",
                    vec![spec],
                )),
                |_, id| FulfillmentOperation::empty(OperationId::new(id)),
            )
            .unwrap();

        b.iter(|| {
            let cmd = ProcessItems {
                tenant_id,
                operation_id,
                items: vec![ItemProgress {
                    item_id,
                    quantity: black_box(1),
                    destination_location: None,
                }],
                processed_by: worker,
                occurred_at: Utc::now(),
            };
            dispatcher
                .dispatch(
                    tenant_id,
                    operation_id.0,
                    "fulfillment.operation",
                    OperationCommand::ProcessItems(cmd),
                    |_, id| FulfillmentOperation::empty(OperationId::new(id)),
                )
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");
    group.throughput(Throughput::Elements(1));

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            batch_size,
            |b, &size| {
                let store = InMemoryEventStore::new();
                let tenant_id = TenantId::new();
                let operation_id = OperationId::new(AggregateId::new());
                let author = UserId::new();

                b.iter(|| {
                    let events: Vec<UncommittedEvent> = (0..size)
                        .map(|i| {
                            let event = OperationEvent::NoteAppended(NoteAppended {
                                tenant_id,
                                operation_id,
                                note: format!("note {i}"),
                                noted_by: author,
                                occurred_at: Utc::now(),
                            });
                            UncommittedEvent::from_typed(
                                tenant_id,
                                operation_id.0,
                                "fulfillment.operation",
                                uuid::Uuid::now_v7(),
                                &event,
                            )
                            .unwrap()
                        })
                        .collect();

                    black_box(
                        store
                            .append(events, wareflow_core::ExpectedVersion::Any)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [10, 100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_events", event_count),
            event_count,
            |b, &count| {
                let store = InMemoryEventStore::new();
                let tenant_id = TenantId::new();
                let operation_id = OperationId::new(AggregateId::new());
                let spec = item_spec(count as u64);
                let item_id = spec.item_id;
                let worker = UserId::new();

                // Pre-generate events
                let mut all_envelopes = Vec::new();
                {
                    let create_event = OperationEvent::OperationCreated(OperationCreated {
                        tenant_id,
                        operation_id,
                        branch_id: BranchId::new(),
                        kind: OperationKind::Picking,
                        folio: "PIK-000001".to_string(),
                        origin: None,
                        source_location: None,
                        destination_location: None,
                        priority: 0,
                        scheduled_for: None,
                        notes: String::new(),
                        items: vec![spec],
                        created_by: worker,
                        occurred_at: Utc::now(),
                    });
                    let uncommitted = UncommittedEvent::from_typed(
                        tenant_id,
                        operation_id.0,
                        "fulfillment.operation",
                        uuid::Uuid::now_v7(),
                        &create_event,
                    )
                    .unwrap();
                    let stored = store
                        .append(vec![uncommitted], wareflow_core::ExpectedVersion::Any)
                        .unwrap();
                    all_envelopes.push(stored[0].to_envelope());

                    // One unit of fulfillment per event
                    for i in 0..(count - 1) {
                        let progress_event = OperationEvent::ItemProcessed(ItemProcessed {
                            tenant_id,
                            operation_id,
                            item_id,
                            quantity: 1,
                            new_processed: (i + 1) as u64,
                            destination_location: None,
                            processed_by: worker,
                            occurred_at: Utc::now(),
                        });
                        let uncommitted = UncommittedEvent::from_typed(
                            tenant_id,
                            operation_id.0,
                            "fulfillment.operation",
                            uuid::Uuid::now_v7(),
                            &progress_event,
                        )
                        .unwrap();
                        let stored = store
                            .append(
                                vec![uncommitted],
                                wareflow_core::ExpectedVersion::Exact((i + 1) as u64),
                            )
                            .unwrap();
                        all_envelopes.push(stored[0].to_envelope());
                    }
                }

                let read_model_store: Arc<InMemoryTenantStore<OperationId, OperationReadModel>> =
                    Arc::new(InMemoryTenantStore::new());
                let projection = OperationsProjection::new(read_model_store);

                b.iter(|| {
                    projection
                        .rebuild_from_scratch(black_box(all_envelopes.clone()))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_event_sourcing_vs_naive_crud(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_sourcing_vs_naive_crud");
    group.sample_size(1000);

    // Benchmark: Event sourcing (create + process)
    group.bench_function("event_sourcing_create_and_process", |b| {
        let (dispatcher, tenant_id) = setup_event_sourcing();
        let worker = UserId::new();

        b.iter(|| {
            let operation_id = OperationId::new(AggregateId::new());
            let spec = item_spec(100);
            let item_id = spec.item_id;

            dispatcher
                .dispatch(
                    tenant_id,
                    operation_id.0,
                    "fulfillment.operation",
                    OperationCommand::CreateOperation(create_cmd(
                        tenant_id,
                        operation_id,
                        "PIK-000001",
                        vec![spec],
                    )),
                    |_, id| FulfillmentOperation::empty(OperationId::new(id)),
                )
                .unwrap();

            dispatcher
                .dispatch(
                    tenant_id,
                    operation_id.0,
                    "fulfillment.operation",
                    OperationCommand::ProcessItems(ProcessItems {
                        tenant_id,
                        operation_id,
                        items: vec![ItemProgress {
                            item_id,
                            quantity: 10,
                            destination_location: None,
                        }],
                        processed_by: worker,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| FulfillmentOperation::empty(OperationId::new(id)),
                )
                .unwrap();
        });
    });

    // Benchmark: Naive CRUD (create + process)
    group.bench_function("naive_crud_create_and_process", |b| {
        let store = NaiveCrudStore::new();
        let tenant_id = TenantId::new();
        let operation_id = AggregateId::new();

        b.iter(|| {
            store.create(tenant_id, operation_id, "PIK-000001".to_string(), 100);
            store.process(tenant_id, operation_id, 10).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_projection_rebuild_speed,
    bench_event_sourcing_vs_naive_crud
);
criterion_main!(benches);
