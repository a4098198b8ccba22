//! # Insert Destinations
//!
//! An insert destination is the funnel through which relational
//! operators materialize output tuples into storage blocks. Many worker
//! threads share one destination per producing operator; the
//! destination routes every tuple into a block, publishes blocks that
//! fill to the scheduler, and accounts for every block it ever touched.
//!
//! ## Strategies
//!
//! | Strategy | Block acquisition | Use case |
//! |----------|-------------------|----------|
//! | `AlwaysNew` | fresh block every time | writers needing independent output blocks |
//! | `BlockPool` | pool of partially-filled blocks | general pipelined operators |
//! | `PartitionAware` | one pool per partition | partitioned relations |
//!
//! ## Acquisition / Release Protocol
//!
//! ```text
//! worker                      destination                 scheduler
//!   │ insert_tuple(t)            │                           │
//!   ├───────────────────────────>│ pop / pin / create block  │
//!   │                            │ block.insert(t)           │
//!   │                            │ full? ──── notify ───────>│
//!   │                            │ else: back to pool        │
//! ```
//!
//! A block handed to a worker is owned exclusively through its
//! `MutableBlockRef`; the pool re-takes ownership on release. Pool
//! locks are held only for O(1) vector manipulation — never across an
//! insert, an allocation, or a bus send.
//!
//! ## Teardown
//!
//! After all workers have returned their blocks, the owner drains the
//! partially-filled blocks (`partially_filled_blocks`, once) and then
//! collects the complete touched-block report (`touched_blocks`, once,
//! crate-internal). Violating the order or calling twice is an error:
//! downstream scheduling arithmetic depends on exactly-once reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};

use crate::bus::{ClientId, DataPipelineMessage, MessageBus, WorkerClientMap};
use crate::error::DestinationError;
use crate::schema::{PartitionId, PartitionSchemeHeader, RelationSchema};
use crate::storage::{
    AccessorGroup, BlockId, BlockLayout, MutableBlockRef, StorageManager, ValueAccessor,
};
use crate::types::{AttributeId, Tuple};

mod always_new;
mod block_pool;
mod descriptor;
mod partition_aware;

pub use always_new::AlwaysNewDestination;
pub use block_pool::BlockPoolDestination;
pub use descriptor::InsertDestinationDescriptor;
pub use partition_aware::PartitionAwareDestination;

/// Strategy selector, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InsertDestinationKind {
    AlwaysCreateBlock = 0,
    BlockPool = 1,
    PartitionAware = 2,
}

impl InsertDestinationKind {
    pub fn name(self) -> &'static str {
        match self {
            InsertDestinationKind::AlwaysCreateBlock => "always-create-block",
            InsertDestinationKind::BlockPool => "block-pool",
            InsertDestinationKind::PartitionAware => "partition-aware",
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(InsertDestinationKind::AlwaysCreateBlock),
            1 => Some(InsertDestinationKind::BlockPool),
            2 => Some(InsertDestinationKind::PartitionAware),
            _ => None,
        }
    }
}

/// Everything a destination needs at construction time.
pub struct DestinationContext {
    pub relation: Arc<RelationSchema>,
    /// Layout for newly created blocks; the relation's default when absent.
    pub layout: Option<BlockLayout>,
    pub storage: Arc<StorageManager>,
    /// Index of the producing operator in the query plan DAG.
    pub operator_index: u64,
    pub query_id: u64,
    /// Receiver of block-filled notifications.
    pub scheduler_client_id: ClientId,
    pub bus: Arc<dyn MessageBus>,
    pub worker_map: Arc<WorkerClientMap>,
}

/// State shared by every strategy: the relation binding, the resolved
/// layout, and the notification endpoint.
pub(crate) struct DestinationCore {
    relation: Arc<RelationSchema>,
    layout: BlockLayout,
    storage: Arc<StorageManager>,
    operator_index: u64,
    query_id: u64,
    scheduler_client_id: ClientId,
    bus: Arc<dyn MessageBus>,
    worker_map: Arc<WorkerClientMap>,
    partials_drained: AtomicBool,
    touched_reported: AtomicBool,
}

impl DestinationCore {
    fn new(context: DestinationContext) -> Self {
        let layout = context
            .layout
            .unwrap_or_else(|| context.relation.default_layout().clone());
        Self {
            relation: context.relation,
            layout,
            storage: context.storage,
            operator_index: context.operator_index,
            query_id: context.query_id,
            scheduler_client_id: context.scheduler_client_id,
            bus: context.bus,
            worker_map: context.worker_map,
            partials_drained: AtomicBool::new(false),
            touched_reported: AtomicBool::new(false),
        }
    }

    fn create_block(&self) -> Result<MutableBlockRef> {
        self.storage.create_block(&self.relation, &self.layout)
    }

    /// Publishes a block to the scheduler. Failure means downstream
    /// consumers would never learn about the block, so the caller must
    /// treat it as fatal to the query.
    fn notify_filled(&self, block_id: BlockId, partition_id: PartitionId) -> Result<()> {
        let broken = |reason: String| DestinationError::PipelineBroken { block_id, reason };

        let sender = self
            .worker_map
            .current()
            .map_err(|e| broken(e.to_string()))?;
        let message = DataPipelineMessage::new(
            self.operator_index,
            block_id,
            self.query_id,
            self.relation.id(),
            partition_id,
        );
        tracing::debug!(
            block_id,
            partition_id,
            query_id = self.query_id,
            "block filled, notifying scheduler"
        );
        self.bus
            .send(sender, self.scheduler_client_id, message.to_tagged())
            .map_err(|e| broken(e.to_string()))?;
        Ok(())
    }

    fn check_tuple_arity(&self, tuple: &Tuple) -> Result<()> {
        ensure!(
            tuple.arity() == self.relation.arity(),
            "tuple arity {} does not match relation '{}' arity {}",
            tuple.arity(),
            self.relation.name(),
            self.relation.arity()
        );
        Ok(())
    }

    fn check_attribute_map(
        &self,
        attribute_map: &[AttributeId],
        accessor: &dyn ValueAccessor,
    ) -> Result<()> {
        ensure!(
            attribute_map.len() == self.relation.arity(),
            "attribute map covers {} attributes, relation '{}' has {}",
            attribute_map.len(),
            self.relation.name(),
            self.relation.arity()
        );
        for &source in attribute_map {
            ensure!(
                (source as usize) < accessor.num_attributes(),
                "attribute map references accessor attribute {} of {}",
                source,
                accessor.num_attributes()
            );
        }
        Ok(())
    }
}

/// The strategy-agnostic half of the acquisition/release protocol.
/// Strategies provide block sourcing; the generic ingest loops below
/// provide retry, fatal-size detection, and bulk draining.
pub(crate) trait BlockSource {
    fn get_block_for_insertion(&self) -> Result<MutableBlockRef>;

    /// `full`: the worker ran out of space in this block.
    fn return_block(&self, block: MutableBlockRef, full: bool) -> Result<()>;
}

fn insert_tuple_via<S: BlockSource + ?Sized>(
    source: &S,
    tuple: &Tuple,
    batch: bool,
) -> Result<()> {
    let mut block = source.get_block_for_insertion()?;
    loop {
        let inserted = if batch {
            block.insert_tuple_in_batch(tuple)
        } else {
            block.insert_tuple(tuple)
        };
        if inserted {
            break;
        }
        if block.is_empty() {
            // Even a fresh block cannot hold this tuple; no allocation
            // strategy makes progress from here. The block is dropped
            // unreturned: it was never written, so it must not enter
            // the touched accounting or reach the scheduler.
            let capacity_bytes = block.capacity_bytes();
            drop(block);
            return Err(DestinationError::FatalTupleSize {
                tuple_bytes: tuple.byte_width(),
                capacity_bytes,
            }
            .into());
        }
        source.return_block(block, true)?;
        block = source.get_block_for_insertion()?;
    }
    source.return_block(block, false)
}

fn bulk_insert_via<S: BlockSource + ?Sized>(
    source: &S,
    accessor: &mut dyn ValueAccessor,
    attribute_map: Option<&[AttributeId]>,
    always_mark_full: bool,
) -> Result<()> {
    loop {
        let mut block = source.get_block_for_insertion()?;
        block.bulk_insert(accessor, attribute_map);
        let exhausted = accessor.exhausted();
        source.return_block(block, !exhausted || always_mark_full)?;
        if exhausted {
            return Ok(());
        }
    }
}

/// A destination for one producing operator, shared by its workers.
pub enum InsertDestination {
    AlwaysNew(AlwaysNewDestination),
    BlockPool(BlockPoolDestination),
    PartitionAware(PartitionAwareDestination),
}

impl std::fmt::Debug for InsertDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsertDestination::AlwaysNew(_) => f.write_str("InsertDestination::AlwaysNew(..)"),
            InsertDestination::BlockPool(_) => f.write_str("InsertDestination::BlockPool(..)"),
            InsertDestination::PartitionAware(_) => {
                f.write_str("InsertDestination::PartitionAware(..)")
            }
        }
    }
}

impl InsertDestination {
    pub fn always_new(context: DestinationContext) -> Self {
        InsertDestination::AlwaysNew(AlwaysNewDestination::new(DestinationCore::new(context)))
    }

    pub fn block_pool(context: DestinationContext, seed_blocks: Vec<BlockId>) -> Self {
        InsertDestination::BlockPool(BlockPoolDestination::new(
            DestinationCore::new(context),
            seed_blocks,
        ))
    }

    pub fn partition_aware(
        context: DestinationContext,
        scheme: PartitionSchemeHeader,
        seed_blocks: Vec<Vec<BlockId>>,
    ) -> Result<Self> {
        Ok(InsertDestination::PartitionAware(
            PartitionAwareDestination::new(DestinationCore::new(context), scheme, seed_blocks)?,
        ))
    }

    /// Rebuilds a destination from its wire descriptor.
    pub fn from_descriptor(
        descriptor: &InsertDestinationDescriptor,
        context: DestinationContext,
    ) -> Result<Self> {
        if !descriptor.is_valid_for(&context.relation) {
            return Err(DestinationError::MalformedDescriptor(format!(
                "descriptor is not valid for relation '{}'",
                context.relation.name()
            ))
            .into());
        }
        match descriptor.kind() {
            InsertDestinationKind::AlwaysCreateBlock => Ok(Self::always_new(context)),
            InsertDestinationKind::BlockPool => {
                Ok(Self::block_pool(context, descriptor.seed_blocks().to_vec()))
            }
            InsertDestinationKind::PartitionAware => {
                let Some(scheme) = descriptor.partition_scheme() else {
                    return Err(DestinationError::MalformedDescriptor(
                        "partition-aware descriptor without a partition scheme".into(),
                    )
                    .into());
                };
                Self::partition_aware(
                    context,
                    scheme.clone(),
                    descriptor.partition_seed_blocks().to_vec(),
                )
            }
        }
    }

    pub(crate) fn core(&self) -> &DestinationCore {
        match self {
            InsertDestination::AlwaysNew(d) => d.core(),
            InsertDestination::BlockPool(d) => d.core(),
            InsertDestination::PartitionAware(d) => d.core(),
        }
    }

    pub fn kind(&self) -> InsertDestinationKind {
        match self {
            InsertDestination::AlwaysNew(_) => InsertDestinationKind::AlwaysCreateBlock,
            InsertDestination::BlockPool(_) => InsertDestinationKind::BlockPool,
            InsertDestination::PartitionAware(_) => InsertDestinationKind::PartitionAware,
        }
    }

    pub fn relation(&self) -> &RelationSchema {
        &self.core().relation
    }

    /// Attribute ids the destination routes on; empty unless
    /// partition-aware with declared partition attributes.
    pub fn partitioning_attributes(&self) -> &[AttributeId] {
        match self {
            InsertDestination::PartitionAware(d) => d.scheme().attribute_ids(),
            _ => &[],
        }
    }

    /// Appends one tuple with exact byte accounting.
    pub fn insert_tuple(&self, tuple: &Tuple) -> Result<()> {
        self.core().check_tuple_arity(tuple)?;
        match self {
            InsertDestination::AlwaysNew(d) => insert_tuple_via(d, tuple, false),
            InsertDestination::BlockPool(d) => insert_tuple_via(d, tuple, false),
            InsertDestination::PartitionAware(d) => d.insert_tuple(tuple, false),
        }
    }

    /// Appends one tuple, deferring exact stat work; preferred when
    /// many tuples arrive in sequence.
    pub fn insert_tuple_in_batch(&self, tuple: &Tuple) -> Result<()> {
        self.core().check_tuple_arity(tuple)?;
        match self {
            InsertDestination::AlwaysNew(d) => insert_tuple_via(d, tuple, true),
            InsertDestination::BlockPool(d) => insert_tuple_via(d, tuple, true),
            InsertDestination::PartitionAware(d) => d.insert_tuple(tuple, true),
        }
    }

    /// Inserts every tuple the accessor yields. With
    /// `always_mark_full`, every consumed block is published even if it
    /// still has space, guaranteeing at least one pipeline event per
    /// call.
    pub fn bulk_insert_tuples(
        &self,
        accessor: &mut dyn ValueAccessor,
        always_mark_full: bool,
    ) -> Result<()> {
        ensure!(
            accessor.num_attributes() >= self.relation().arity(),
            "accessor provides {} attributes, relation '{}' needs {}",
            accessor.num_attributes(),
            self.relation().name(),
            self.relation().arity()
        );
        match self {
            InsertDestination::AlwaysNew(d) => {
                bulk_insert_via(d, accessor, None, always_mark_full)
            }
            InsertDestination::BlockPool(d) => {
                bulk_insert_via(d, accessor, None, always_mark_full)
            }
            InsertDestination::PartitionAware(d) => {
                d.bulk_insert(accessor, None, always_mark_full)
            }
        }
    }

    /// Bulk insert where destination attribute `i` reads accessor
    /// attribute `attribute_map[i]`.
    pub fn bulk_insert_tuples_with_remapped_attributes(
        &self,
        attribute_map: &[AttributeId],
        accessor: &mut dyn ValueAccessor,
        always_mark_full: bool,
    ) -> Result<()> {
        self.core().check_attribute_map(attribute_map, accessor)?;
        match self {
            InsertDestination::AlwaysNew(d) => {
                bulk_insert_via(d, accessor, Some(attribute_map), always_mark_full)
            }
            InsertDestination::BlockPool(d) => {
                bulk_insert_via(d, accessor, Some(attribute_map), always_mark_full)
            }
            InsertDestination::PartitionAware(d) => {
                d.bulk_insert(accessor, Some(attribute_map), always_mark_full)
            }
        }
    }

    /// Composes several accessors, each contributing a subset of the
    /// destination's attributes, into one logical row source. Only the
    /// block-pool strategy supports this.
    pub fn bulk_insert_tuples_from_value_accessors(
        &self,
        groups: &mut [AccessorGroup<'_>],
        always_mark_full: bool,
    ) -> Result<()> {
        match self {
            InsertDestination::BlockPool(d) => d.bulk_insert_grouped(groups, always_mark_full),
            other => Err(DestinationError::UnsupportedOperation {
                operation: "bulk_insert_tuples_from_value_accessors",
                destination: other.kind().name(),
            }
            .into()),
        }
    }

    /// Convenience for an in-memory tuple sequence.
    pub fn insert_tuples_from_vector(&self, tuples: &[Tuple]) -> Result<()> {
        for tuple in tuples {
            self.insert_tuple_in_batch(tuple)?;
        }
        Ok(())
    }

    /// Fixes the target partition for destinations whose partition
    /// attribute list is empty (partition-aligned producers). No-op on
    /// non-partitioned strategies.
    pub fn set_input_partition_id(&self, partition: PartitionId) {
        if let InsertDestination::PartitionAware(d) = self {
            d.set_input_partition_id(partition);
        }
    }

    /// Seeds an existing block into a partition's pool. Must be called
    /// at most once per block.
    pub fn add_block_to_pool(&self, block_id: BlockId, partition: PartitionId) -> Result<()> {
        match self {
            InsertDestination::PartitionAware(d) => d.add_block_to_pool(block_id, partition),
            other => Err(DestinationError::UnsupportedOperation {
                operation: "add_block_to_pool",
                destination: other.kind().name(),
            }
            .into()),
        }
    }

    /// Drains the in-memory partially-filled blocks with their
    /// partition ids. Callable exactly once, after every worker has
    /// returned its blocks, and before `touched_blocks`.
    pub fn partially_filled_blocks(&self) -> Result<Vec<(MutableBlockRef, PartitionId)>> {
        if self.core().partials_drained.swap(true, Ordering::AcqRel) {
            return Err(DestinationError::Precondition(
                "partially filled blocks were already drained".into(),
            )
            .into());
        }
        Ok(match self {
            InsertDestination::AlwaysNew(_) => Vec::new(),
            InsertDestination::BlockPool(d) => d.drain_partials(),
            InsertDestination::PartitionAware(d) => d.drain_partials(),
        })
    }

    /// The complete account of every block ever handed out and
    /// returned. Callable exactly once, after the partial drain.
    pub(crate) fn touched_blocks(&self) -> Result<Vec<BlockId>> {
        let core = self.core();
        if !core.partials_drained.load(Ordering::Acquire) {
            return Err(DestinationError::Precondition(
                "partially filled blocks must be drained before the touched-block report".into(),
            )
            .into());
        }
        if core.touched_reported.swap(true, Ordering::AcqRel) {
            return Err(DestinationError::Precondition(
                "touched blocks were already reported".into(),
            )
            .into());
        }
        Ok(match self {
            InsertDestination::AlwaysNew(d) => d.take_touched(),
            InsertDestination::BlockPool(d) => d.take_touched(),
            InsertDestination::PartitionAware(d) => d.take_touched(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for destination tests.

    use super::*;
    use crate::bus::MemoryBus;
    use crate::schema::AttributeDef;
    use crate::types::{DataType, Value};

    pub(crate) struct Fixture {
        pub storage: Arc<StorageManager>,
        pub bus: Arc<MemoryBus>,
        pub worker_map: Arc<WorkerClientMap>,
        pub scheduler: ClientId,
        pub relation: Arc<RelationSchema>,
    }

    impl Fixture {
        /// A two-attribute relation whose blocks cap at `capacity` tuples.
        pub(crate) fn with_capacity(capacity: u32) -> Self {
            let layout = BlockLayout::with_tuple_capacity(
                crate::config::DEFAULT_BLOCK_SIZE,
                capacity,
            )
            .unwrap();
            let relation = RelationSchema::new(
                11,
                "events",
                vec![
                    AttributeDef::new("key", DataType::Int8),
                    AttributeDef::new("label", DataType::Text),
                ],
            )
            .unwrap()
            .with_default_layout(layout);

            let bus = Arc::new(MemoryBus::new());
            let scheduler = bus.register_client();
            let worker_map = Arc::new(WorkerClientMap::new());
            // The test thread doubles as the only worker.
            worker_map.bind_current(bus.register_client());

            Self {
                storage: Arc::new(StorageManager::new()),
                bus,
                worker_map,
                scheduler,
                relation: Arc::new(relation),
            }
        }

        pub(crate) fn context(&self) -> DestinationContext {
            DestinationContext {
                relation: Arc::clone(&self.relation),
                layout: None,
                storage: Arc::clone(&self.storage),
                operator_index: 4,
                query_id: 900,
                scheduler_client_id: self.scheduler,
                bus: Arc::clone(&self.bus) as Arc<dyn MessageBus>,
                worker_map: Arc::clone(&self.worker_map),
            }
        }

        pub(crate) fn tuple(&self, key: i64) -> Tuple {
            Tuple::new(vec![Value::Int(key), Value::Text(format!("row-{key}"))])
        }

        /// All pipeline messages delivered to the scheduler so far.
        pub(crate) fn drain_messages(&self) -> Vec<DataPipelineMessage> {
            let mut out = Vec::new();
            while let Some(tagged) = self.bus.try_receive(self.scheduler) {
                assert_eq!(tagged.kind, crate::bus::KIND_DATA_PIPELINE);
                out.push(*DataPipelineMessage::from_bytes(&tagged.payload).unwrap());
            }
            out
        }
    }
}
