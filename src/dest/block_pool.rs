//! # Block-Pool Strategy
//!
//! Maintains a pool of partially-filled blocks for one relation. A
//! worker checks a block out exclusively, inserts, and returns it; full
//! blocks move to the done list and are published, partial blocks go
//! back into the pool for later top-off.
//!
//! ## Pool State
//!
//! ```text
//! available_refs   loaded partial blocks, ready to hand out
//! available_ids    partial blocks known but not loaded (seeds, drained)
//! done_ids         full blocks, already published downstream
//! ```
//!
//! Every block id ever handed out lives in exactly one of: a worker's
//! hands, `available_refs`, `available_ids`, or `done_ids`.
//!
//! ## Locking
//!
//! One mutex guards the three vectors and is held only for O(1) pops
//! and pushes. Pinning a pending block and allocating a new one both
//! happen outside the critical section — either may block inside the
//! storage manager. The pipeline send also happens outside the lock;
//! per-block ordering still holds because a block is released exactly
//! once.

use eyre::Result;
use parking_lot::Mutex;

use crate::dest::{BlockSource, DestinationCore};
use crate::schema::PartitionId;
use crate::storage::{AccessorGroup, BlockId, MutableBlockRef};

#[derive(Default)]
pub(crate) struct PoolState {
    pub(crate) available_refs: Vec<MutableBlockRef>,
    pub(crate) available_ids: Vec<BlockId>,
    pub(crate) done_ids: Vec<BlockId>,
}

impl PoolState {
    pub(crate) fn seeded(seed_blocks: Vec<BlockId>) -> Self {
        Self {
            available_refs: Vec::new(),
            available_ids: seed_blocks,
            done_ids: Vec::new(),
        }
    }

    /// Moves the loaded partials out, keeping their ids in the pending
    /// list so the touched-block report stays complete.
    pub(crate) fn drain_partials(&mut self) -> Vec<MutableBlockRef> {
        let refs = std::mem::take(&mut self.available_refs);
        self.available_ids.extend(refs.iter().map(|r| r.id()));
        refs
    }

    pub(crate) fn take_touched(&mut self) -> Vec<BlockId> {
        let mut ids = std::mem::take(&mut self.available_ids);
        ids.append(&mut self.done_ids);
        ids
    }
}

pub struct BlockPoolDestination {
    core: DestinationCore,
    pool: Mutex<PoolState>,
}

impl BlockPoolDestination {
    pub(crate) fn new(core: DestinationCore, seed_blocks: Vec<BlockId>) -> Self {
        Self {
            core,
            pool: Mutex::new(PoolState::seeded(seed_blocks)),
        }
    }

    pub(crate) fn core(&self) -> &DestinationCore {
        &self.core
    }

    pub(crate) fn drain_partials(&self) -> Vec<(MutableBlockRef, PartitionId)> {
        self.pool
            .lock()
            .drain_partials()
            .into_iter()
            .map(|block| (block, 0))
            .collect()
    }

    pub(crate) fn take_touched(&self) -> Vec<BlockId> {
        self.pool.lock().take_touched()
    }

    /// Lock-step bulk insert composing several accessors, each
    /// contributing a disjoint subset of destination attributes.
    pub(crate) fn bulk_insert_grouped(
        &self,
        groups: &mut [AccessorGroup<'_>],
        always_mark_full: bool,
    ) -> Result<()> {
        use eyre::ensure;

        ensure!(!groups.is_empty(), "composed bulk insert needs at least one accessor");
        let arity = self.core.relation.arity();
        let mut covered = vec![false; arity];
        for group in groups.iter() {
            ensure!(
                group.attribute_map.len() == group.accessor.num_attributes(),
                "accessor group maps {} attributes but provides {}",
                group.attribute_map.len(),
                group.accessor.num_attributes()
            );
            for &dest in &group.attribute_map {
                ensure!(
                    (dest as usize) < arity && !covered[dest as usize],
                    "destination attribute {} is unknown or covered twice",
                    dest
                );
                covered[dest as usize] = true;
            }
        }
        ensure!(
            covered.iter().all(|&c| c),
            "accessor groups leave destination attributes uncovered"
        );
        let rows = groups[0].accessor.num_tuples();
        for group in groups.iter() {
            ensure!(
                group.accessor.num_tuples() == rows,
                "composed accessors disagree on row count"
            );
        }

        loop {
            let mut block = self.get_block_for_insertion()?;
            block.bulk_insert_grouped(groups)?;
            let exhausted = groups[0].accessor.exhausted();
            self.return_block(block, !exhausted || always_mark_full)?;
            if exhausted {
                return Ok(());
            }
        }
    }

}

impl BlockSource for BlockPoolDestination {
    fn get_block_for_insertion(&self) -> Result<MutableBlockRef> {
        let pending = {
            let mut pool = self.pool.lock();
            if let Some(block) = pool.available_refs.pop() {
                return Ok(block);
            }
            pool.available_ids.pop()
        };
        // Pin or allocate outside the pool lock; both may block inside
        // the storage manager.
        match pending {
            Some(id) => self.core.storage.pin_block(id),
            None => self.core.create_block(),
        }
    }

    fn return_block(&self, block: MutableBlockRef, full: bool) -> Result<()> {
        if full {
            let id = block.id();
            // Write-back precedes the notification.
            drop(block);
            self.pool.lock().done_ids.push(id);
            self.core.notify_filled(id, 0)?;
        } else {
            self.pool.lock().available_refs.push(block);
        }
        Ok(())
    }
}
