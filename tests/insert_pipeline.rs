//! # End-to-End Pipeline Tests
//!
//! Single-threaded scenarios exercised entirely through the public
//! surface: a destination is built (directly or from its wire
//! descriptor), tuples flow in, and the test observes what a scheduler
//! and a downstream consumer would observe — pipeline messages, block
//! contents, and drained partials.

use std::sync::Arc;

use quarry::{
    AttributeDef, BlockLayout, ColumnBatch, DataPipelineMessage, DataType, DestinationContext,
    InsertDestination, InsertDestinationDescriptor, InsertDestinationKind, MemoryBus, MessageBus,
    PartitionSchemeHeader, RelationSchema, StorageManager, Tuple, Value, WorkerClientMap,
    KIND_DATA_PIPELINE,
};

struct Harness {
    storage: Arc<StorageManager>,
    bus: Arc<MemoryBus>,
    worker_map: Arc<WorkerClientMap>,
    scheduler: u32,
    relation: Arc<RelationSchema>,
}

impl Harness {
    fn new(capacity: u32) -> Self {
        let layout = BlockLayout::with_tuple_capacity(2 * 1024 * 1024, capacity).unwrap();
        let relation = RelationSchema::new(
            3,
            "output",
            vec![
                AttributeDef::new("bucket", DataType::Int8),
                AttributeDef::new("label", DataType::Text),
            ],
        )
        .unwrap()
        .with_default_layout(layout);

        let bus = Arc::new(MemoryBus::new());
        let scheduler = bus.register_client();
        let worker_map = Arc::new(WorkerClientMap::new());
        worker_map.bind_current(bus.register_client());

        Self {
            storage: Arc::new(StorageManager::new()),
            bus,
            worker_map,
            scheduler,
            relation: Arc::new(relation),
        }
    }

    fn context(&self) -> DestinationContext {
        DestinationContext {
            relation: Arc::clone(&self.relation),
            layout: None,
            storage: Arc::clone(&self.storage),
            operator_index: 7,
            query_id: 5,
            scheduler_client_id: self.scheduler,
            bus: Arc::clone(&self.bus) as Arc<dyn MessageBus>,
            worker_map: Arc::clone(&self.worker_map),
        }
    }

    fn drain_messages(&self) -> Vec<DataPipelineMessage> {
        let mut out = Vec::new();
        while let Some(tagged) = self.bus.try_receive(self.scheduler) {
            assert_eq!(tagged.kind, KIND_DATA_PIPELINE);
            out.push(*DataPipelineMessage::from_bytes(&tagged.payload).unwrap());
        }
        out
    }
}

fn tuple(bucket: i64) -> Tuple {
    Tuple::new(vec![Value::Int(bucket), Value::Text(format!("b{bucket}"))])
}

#[test]
fn always_new_publishes_every_block() {
    let harness = Harness::new(1000);
    let destination = InsertDestination::always_new(harness.context());
    assert_eq!(destination.kind(), InsertDestinationKind::AlwaysCreateBlock);

    for bucket in 0..3 {
        destination.insert_tuple(&tuple(bucket)).unwrap();
    }

    let messages = harness.drain_messages();
    assert_eq!(messages.len(), 3);
    for message in &messages {
        assert_eq!(message.operator_index(), 7);
        assert_eq!(message.query_id(), 5);
        assert_eq!(message.relation_id(), harness.relation.id());
        assert_eq!(message.partition_id(), 0);

        let block = harness.storage.pin_block(message.block_id()).unwrap();
        assert_eq!(block.tuple_count(), 1);
    }

    assert!(destination.partially_filled_blocks().unwrap().is_empty());
}

#[test]
fn partitioned_flow_matches_routing_function() {
    let harness = Harness::new(10);
    let scheme = PartitionSchemeHeader::range(
        0,
        vec![Value::Int(100), Value::Int(200), Value::Int(300)],
    )
    .unwrap();
    let destination =
        InsertDestination::partition_aware(harness.context(), scheme.clone(), Vec::new())
            .unwrap();
    assert_eq!(destination.partitioning_attributes(), &[0]);

    // 30 tuples into band 1 (fills blocks), a few elsewhere.
    for _ in 0..30 {
        destination.insert_tuple(&tuple(150)).unwrap();
    }
    destination.insert_tuple(&tuple(50)).unwrap();
    destination.insert_tuple(&tuple(350)).unwrap();

    let messages = harness.drain_messages();
    assert_eq!(messages.len(), 2, "band 1 filled two capacity-10 blocks");
    for message in &messages {
        assert_eq!(message.partition_id(), 1);
        let block = harness.storage.pin_block(message.block_id()).unwrap();
        for value in block.column(0) {
            assert_eq!(scheme.partition_id_for(&[value]).unwrap(), 1);
        }
    }

    let partials = destination.partially_filled_blocks().unwrap();
    let mut partition_counts: Vec<(u32, u32)> = partials
        .iter()
        .map(|(block, partition)| (*partition, block.tuple_count()))
        .collect();
    partition_counts.sort_unstable();
    assert_eq!(partition_counts, vec![(0, 1), (1, 10), (3, 1)]);
}

#[test]
fn descriptor_flow_reconstructs_and_ingests() {
    let harness = Harness::new(100);
    let scheme = PartitionSchemeHeader::hash(4, vec![0]).unwrap();
    let wire = InsertDestinationDescriptor::partition_aware(scheme.clone(), Vec::new()).to_bytes();

    let descriptor = InsertDestinationDescriptor::from_bytes(&wire).unwrap();
    assert!(descriptor.is_valid_for(&harness.relation));
    let destination =
        InsertDestination::from_descriptor(&descriptor, harness.context()).unwrap();

    let tuples: Vec<_> = (0..40).map(tuple).collect();
    let mut batch = ColumnBatch::from_tuples(&tuples).unwrap();
    destination.bulk_insert_tuples(&mut batch, true).unwrap();

    // always_mark_full forces one publication per non-empty partition.
    let messages = harness.drain_messages();
    let mut partitions: Vec<_> = messages.iter().map(|m| m.partition_id()).collect();
    partitions.sort_unstable();
    partitions.dedup();
    assert_eq!(partitions.len(), messages.len(), "one event per partition");

    let mut persisted = 0u32;
    for message in &messages {
        let block = harness.storage.pin_block(message.block_id()).unwrap();
        for value in block.column(0) {
            assert_eq!(
                scheme.partition_id_for(&[value]).unwrap(),
                message.partition_id()
            );
        }
        persisted += block.tuple_count();
    }
    assert_eq!(persisted, 40);
    assert!(destination.partially_filled_blocks().unwrap().is_empty());
}

#[test]
fn input_partition_pins_partition_for_aligned_producers() {
    let harness = Harness::new(1000);
    let scheme = PartitionSchemeHeader::hash(4, Vec::new()).unwrap();
    let destination =
        InsertDestination::partition_aware(harness.context(), scheme, Vec::new()).unwrap();
    destination.set_input_partition_id(2);

    let tuples: Vec<_> = (0..50).map(tuple).collect();
    let mut batch = ColumnBatch::from_tuples(&tuples).unwrap();
    destination.bulk_insert_tuples(&mut batch, true).unwrap();

    let messages = harness.drain_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].partition_id(), 2);
    assert_eq!(
        harness
            .storage
            .pin_block(messages[0].block_id())
            .unwrap()
            .tuple_count(),
        50
    );
}

#[test]
fn tuple_vector_convenience_path() {
    let harness = Harness::new(8);
    let destination = InsertDestination::block_pool(harness.context(), Vec::new());

    let tuples: Vec<_> = (0..20).map(tuple).collect();
    destination.insert_tuples_from_vector(&tuples).unwrap();

    let full: u32 = harness
        .drain_messages()
        .iter()
        .map(|m| harness.storage.pin_block(m.block_id()).unwrap().tuple_count())
        .sum();
    let partial: u32 = destination
        .partially_filled_blocks()
        .unwrap()
        .iter()
        .map(|(block, _)| block.tuple_count())
        .sum();
    assert_eq!(full + partial, 20);
}
