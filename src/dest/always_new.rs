//! The simplest strategy: a fresh block for every acquisition.
//!
//! Used when the consumer requires each output block to be independent
//! (sort-phase run writers, for example). Every released block is
//! recorded and published, so downstream operators can pipeline on each
//! one immediately; there is no pool and there are no partials.

use eyre::Result;
use parking_lot::Mutex;

use crate::dest::{BlockSource, DestinationCore};
use crate::storage::{BlockId, MutableBlockRef};

pub struct AlwaysNewDestination {
    core: DestinationCore,
    returned_block_ids: Mutex<Vec<BlockId>>,
}

impl AlwaysNewDestination {
    pub(crate) fn new(core: DestinationCore) -> Self {
        Self {
            core,
            returned_block_ids: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn core(&self) -> &DestinationCore {
        &self.core
    }

    pub(crate) fn take_touched(&self) -> Vec<BlockId> {
        std::mem::take(&mut *self.returned_block_ids.lock())
    }
}

impl BlockSource for AlwaysNewDestination {
    fn get_block_for_insertion(&self) -> Result<MutableBlockRef> {
        self.core.create_block()
    }

    fn return_block(&self, block: MutableBlockRef, _full: bool) -> Result<()> {
        let id = block.id();
        // Write-back before the notification: the scheduler must find
        // the tuples when it pins the block.
        drop(block);
        self.returned_block_ids.lock().push(id);
        self.core.notify_filled(id, 0)
    }
}
