//! # Partition-Aware Strategy
//!
//! One block pool per partition, one mutex per partition. Tuples route
//! through the partition scheme header; bulk batches are split into
//! per-partition tuple-id sequences by a single membership scan, then
//! each non-empty partition runs the ordinary pool protocol against its
//! own pool.
//!
//! ## Locking
//!
//! The per-partition mutexes are cache-padded so hot neighbors do not
//! false-share. No operation ever holds two partition locks at once,
//! so no lock ordering is needed; teardown walks partitions in
//! ascending order, locking one at a time.
//!
//! ## Partition Binding
//!
//! A block joins exactly one partition's pool when it is first created
//! (or seeded via `add_block_to_pool`) and never migrates: acquisition,
//! release, and accounting all happen against that partition's state.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::CachePadded;
use eyre::{ensure, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::dest::block_pool::PoolState;
use crate::dest::{insert_tuple_via, BlockSource, DestinationCore};
use crate::schema::{PartitionId, PartitionSchemeHeader};
use crate::storage::{BlockId, MutableBlockRef, TupleIdSequence, ValueAccessor};
use crate::types::{AttributeId, Tuple, Value};

pub struct PartitionAwareDestination {
    core: DestinationCore,
    scheme: PartitionSchemeHeader,
    pools: Box<[CachePadded<Mutex<PoolState>>]>,
    /// Target partition when the scheme declares no routing attributes.
    input_partition_id: AtomicU32,
}

impl PartitionAwareDestination {
    pub(crate) fn new(
        core: DestinationCore,
        scheme: PartitionSchemeHeader,
        seed_blocks: Vec<Vec<BlockId>>,
    ) -> Result<Self> {
        scheme.validate_for(&core.relation)?;
        let num_partitions = scheme.num_partitions() as usize;

        let seeds = if seed_blocks.is_empty() {
            vec![Vec::new(); num_partitions]
        } else {
            ensure!(
                seed_blocks.len() == num_partitions,
                "seed blocks for {} partitions supplied to a {}-partition scheme",
                seed_blocks.len(),
                num_partitions
            );
            seed_blocks
        };

        Ok(Self {
            core,
            scheme,
            pools: seeds
                .into_iter()
                .map(|seed| CachePadded::new(Mutex::new(PoolState::seeded(seed))))
                .collect(),
            input_partition_id: AtomicU32::new(0),
        })
    }

    pub(crate) fn core(&self) -> &DestinationCore {
        &self.core
    }

    pub fn scheme(&self) -> &PartitionSchemeHeader {
        &self.scheme
    }

    pub(crate) fn set_input_partition_id(&self, partition: PartitionId) {
        debug_assert!(partition < self.scheme.num_partitions());
        self.input_partition_id.store(partition, Ordering::Relaxed);
    }

    /// Seeds an existing block into one partition's pool. Callers must
    /// add each block at most once.
    pub fn add_block_to_pool(&self, block_id: BlockId, partition: PartitionId) -> Result<()> {
        ensure!(
            partition < self.scheme.num_partitions(),
            "partition {} out of range for a {}-partition scheme",
            partition,
            self.scheme.num_partitions()
        );
        let mut pool = self.pools[partition as usize].lock();
        debug_assert!(
            !pool.available_ids.contains(&block_id),
            "block {block_id} seeded twice into partition {partition}"
        );
        pool.available_ids.push(block_id);
        Ok(())
    }

    fn partition_of_tuple(&self, tuple: &Tuple) -> Result<PartitionId> {
        let attributes = self.scheme.attribute_ids();
        if attributes.is_empty() {
            return Ok(self.input_partition_id.load(Ordering::Relaxed));
        }
        let values: SmallVec<[&Value; 4]> =
            attributes.iter().map(|&a| tuple.value(a)).collect();
        self.scheme.partition_id_for(&values)
    }

    pub(crate) fn insert_tuple(&self, tuple: &Tuple, batch: bool) -> Result<()> {
        let partition = self.partition_of_tuple(tuple)?;
        insert_tuple_via(&PartitionSlot { dest: self, partition }, tuple, batch)
    }

    /// Splits the batch into per-partition tuple-id sequences with one
    /// membership scan, then drains each non-empty partition through
    /// its own pool. Partitions with no tuples incur no work.
    pub(crate) fn bulk_insert(
        &self,
        accessor: &mut dyn ValueAccessor,
        attribute_map: Option<&[AttributeId]>,
        always_mark_full: bool,
    ) -> Result<()> {
        let num_partitions = self.scheme.num_partitions() as usize;
        let mut membership = vec![TupleIdSequence::new(); num_partitions];

        let attributes = self.scheme.attribute_ids();
        if attributes.is_empty() {
            let partition = self.input_partition_id.load(Ordering::Relaxed) as usize;
            ensure!(
                partition < num_partitions,
                "input partition {} out of range for a {}-partition scheme",
                partition,
                num_partitions
            );
            while accessor.next() {
                membership[partition].set(accessor.current_position() as u32);
            }
        } else {
            while accessor.next() {
                let values: SmallVec<[&Value; 4]> = attributes
                    .iter()
                    .map(|&a| {
                        let source = attribute_map.map_or(a, |m| m[a as usize]);
                        accessor.value(source)
                    })
                    .collect();
                let partition = self.scheme.partition_id_for(&values)?;
                membership[partition as usize].set(accessor.current_position() as u32);
            }
        }

        for (partition, tuple_ids) in membership.iter().enumerate() {
            if tuple_ids.is_empty() {
                continue;
            }
            let slot = PartitionSlot {
                dest: self,
                partition: partition as PartitionId,
            };
            let mut positions = tuple_ids.iter().peekable();
            loop {
                let mut block = slot.get_block_for_insertion()?;
                block.bulk_insert_positions(accessor, &mut positions, attribute_map);
                let remaining = positions.peek().is_some();
                slot.return_block(block, remaining || always_mark_full)?;
                if !remaining {
                    break;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn drain_partials(&self) -> Vec<(MutableBlockRef, PartitionId)> {
        let mut out = Vec::new();
        for (partition, pool) in self.pools.iter().enumerate() {
            let drained = pool.lock().drain_partials();
            out.extend(
                drained
                    .into_iter()
                    .map(|block| (block, partition as PartitionId)),
            );
        }
        out
    }

    pub(crate) fn take_touched(&self) -> Vec<BlockId> {
        let mut ids = Vec::new();
        for pool in self.pools.iter() {
            ids.append(&mut pool.lock().take_touched());
        }
        ids
    }
}

/// One partition's view of the pool protocol.
struct PartitionSlot<'a> {
    dest: &'a PartitionAwareDestination,
    partition: PartitionId,
}

impl BlockSource for PartitionSlot<'_> {
    fn get_block_for_insertion(&self) -> Result<MutableBlockRef> {
        let pool = &self.dest.pools[self.partition as usize];
        let pending = {
            let mut pool = pool.lock();
            if let Some(block) = pool.available_refs.pop() {
                return Ok(block);
            }
            pool.available_ids.pop()
        };
        match pending {
            Some(id) => self.dest.core.storage.pin_block(id),
            None => self.dest.core.create_block(),
        }
    }

    fn return_block(&self, block: MutableBlockRef, full: bool) -> Result<()> {
        let pool = &self.dest.pools[self.partition as usize];
        if full {
            let id = block.id();
            drop(block);
            pool.lock().done_ids.push(id);
            self.dest.core.notify_filled(id, self.partition)?;
        } else {
            pool.lock().available_refs.push(block);
        }
        Ok(())
    }
}
