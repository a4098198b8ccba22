//! # Storage Manager
//!
//! The storage manager owns every block of every relation and hands out
//! exclusive, move-only references to them. It is the allocation and
//! pinning facade the insert layer builds on.
//!
//! ## Checkout Protocol
//!
//! ```text
//! 1. create_block(..) / pin_block(id) moves the block out of its slot
//!    and wraps it in a MutableBlockRef (the checkout).
//! 2. The holder mutates the block through the reference. No lock is
//!    held while checked out; exclusivity is ownership, not locking.
//! 3. Dropping the reference moves the block back into its slot.
//! ```
//!
//! A second `pin_block` for a checked-out id fails rather than blocks:
//! the insert layer's pools guarantee a block is offered to exactly one
//! worker at a time, so a concurrent pin is a bug upstream, not a wait
//! condition.
//!
//! ## Lock Sharding
//!
//! Slots live in 64 independently locked shards keyed by a multiplicative
//! hash of the block id, so checkout traffic for unrelated blocks never
//! contends. Shard locks are held only for the O(1) slot move, never
//! across an insert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::STORAGE_SHARD_COUNT;
use crate::schema::RelationSchema;
use crate::storage::{BlockId, BlockLayout, StorageBlock, INVALID_BLOCK_ID};

struct BlockSlot {
    /// None while the block is checked out.
    block: Option<Box<StorageBlock>>,
}

#[derive(Default)]
struct BlockShard {
    slots: HashMap<BlockId, BlockSlot>,
}

pub struct StorageManager {
    shards: Vec<Mutex<BlockShard>>,
    next_block_id: AtomicU64,
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            shards: (0..STORAGE_SHARD_COUNT)
                .map(|_| Mutex::new(BlockShard::default()))
                .collect(),
            next_block_id: AtomicU64::new(INVALID_BLOCK_ID + 1),
        }
    }

    fn shard(&self, id: BlockId) -> &Mutex<BlockShard> {
        let hash = (id as usize).wrapping_mul(31);
        &self.shards[hash % STORAGE_SHARD_COUNT]
    }

    /// Allocates a fresh block for `relation` and checks it out.
    pub fn create_block(
        self: &Arc<Self>,
        relation: &RelationSchema,
        layout: &BlockLayout,
    ) -> Result<MutableBlockRef> {
        let id = self.next_block_id.fetch_add(1, Ordering::Relaxed);
        let block = Box::new(StorageBlock::new(id, relation, layout));

        let mut shard = self.shard(id).lock();
        let previous = shard.slots.insert(id, BlockSlot { block: None });
        debug_assert!(previous.is_none(), "block id {id} allocated twice");
        drop(shard);

        tracing::trace!(block_id = id, relation_id = relation.id(), "created block");
        Ok(MutableBlockRef {
            block: Some(block),
            manager: Arc::clone(self),
        })
    }

    /// Checks out an existing block. Fails if the id is unknown or the
    /// block is already checked out.
    pub fn pin_block(self: &Arc<Self>, id: BlockId) -> Result<MutableBlockRef> {
        let mut shard = self.shard(id).lock();
        let slot = shard
            .slots
            .get_mut(&id)
            .ok_or_else(|| eyre!("unknown block {}", id))?;
        let block = slot.block.take();
        drop(shard);

        ensure!(block.is_some(), "block {} is already checked out", id);
        Ok(MutableBlockRef {
            block,
            manager: Arc::clone(self),
        })
    }

    fn return_block(&self, block: Box<StorageBlock>) {
        let id = block.id();
        let mut shard = self.shard(id).lock();
        let slot = shard
            .slots
            .get_mut(&id)
            .expect("returned block has no slot"); // INVARIANT: slots are never removed while a ref exists
        debug_assert!(slot.block.is_none());
        slot.block = Some(block);
    }

    pub fn block_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().slots.len()).sum()
    }

    /// Whether `id` is currently checked out. `None` for unknown ids.
    pub fn is_checked_out(&self, id: BlockId) -> Option<bool> {
        let shard = self.shard(id).lock();
        shard.slots.get(&id).map(|slot| slot.block.is_none())
    }
}

/// Exclusive, move-only handle to a checked-out block.
///
/// Dropping the handle returns the block to the manager. Never cloned;
/// exclusivity of block mutation is exactly the exclusivity of this
/// value.
pub struct MutableBlockRef {
    block: Option<Box<StorageBlock>>,
    manager: Arc<StorageManager>,
}

impl MutableBlockRef {
    pub fn id(&self) -> BlockId {
        self.block().id()
    }

    fn block(&self) -> &StorageBlock {
        self.block.as_deref().expect("block already returned") // INVARIANT: Some until drop
    }
}

impl std::ops::Deref for MutableBlockRef {
    type Target = StorageBlock;

    fn deref(&self) -> &StorageBlock {
        self.block()
    }
}

impl std::ops::DerefMut for MutableBlockRef {
    fn deref_mut(&mut self) -> &mut StorageBlock {
        self.block.as_deref_mut().expect("block already returned") // INVARIANT: Some until drop
    }
}

impl std::fmt::Debug for MutableBlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableBlockRef")
            .field("block_id", &self.id())
            .field("tuples", &self.tuple_count())
            .finish()
    }
}

impl Drop for MutableBlockRef {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.manager.return_block(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDef;
    use crate::types::{DataType, Tuple, Value};

    fn relation() -> RelationSchema {
        RelationSchema::new(2, "r", vec![AttributeDef::new("a", DataType::Int8)]).unwrap()
    }

    #[test]
    fn test_create_pin_cycle() {
        let manager = Arc::new(StorageManager::new());
        let relation = relation();
        let layout = BlockLayout::with_tuple_capacity(4096, 16).unwrap();

        let mut block = manager.create_block(&relation, &layout).unwrap();
        let id = block.id();
        assert!(block.insert_tuple(&Tuple::new(vec![Value::Int(1)])));
        assert_eq!(manager.is_checked_out(id), Some(true));
        drop(block);
        assert_eq!(manager.is_checked_out(id), Some(false));

        let repinned = manager.pin_block(id).unwrap();
        assert_eq!(repinned.tuple_count(), 1);
    }

    #[test]
    fn test_double_pin_rejected() {
        let manager = Arc::new(StorageManager::new());
        let relation = relation();
        let block = manager
            .create_block(&relation, relation.default_layout())
            .unwrap();
        let id = block.id();

        let err = manager.pin_block(id).unwrap_err();
        assert!(err.to_string().contains("already checked out"));

        drop(block);
        assert!(manager.pin_block(id).is_ok());
    }

    #[test]
    fn test_unknown_block_rejected() {
        let manager = Arc::new(StorageManager::new());
        assert!(manager.pin_block(12345).is_err());
        assert_eq!(manager.is_checked_out(12345), None);
    }

    #[test]
    fn test_block_ids_are_unique_across_threads() {
        let manager = Arc::new(StorageManager::new());
        let relation = Arc::new(relation());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let relation = Arc::clone(&relation);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            manager
                                .create_block(&relation, relation.default_layout())
                                .unwrap()
                                .id()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<BlockId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(manager.block_count(), 200);
    }
}
