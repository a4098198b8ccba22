//! Block layout descriptors.
//!
//! A `BlockLayout` fixes the geometry of newly created blocks: the byte
//! budget, and optionally an explicit tuple capacity. When no explicit
//! capacity is given, capacity derives from the byte budget and the
//! relation's estimated tuple width.

use eyre::{ensure, Result};

use crate::config::{DEFAULT_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::schema::RelationSchema;

#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    block_size: usize,
    tuple_capacity_override: Option<u32>,
}

impl BlockLayout {
    pub fn new(block_size: usize) -> Result<Self> {
        ensure!(
            block_size >= MIN_BLOCK_SIZE,
            "block size {} is below the minimum of {}",
            block_size,
            MIN_BLOCK_SIZE
        );
        Ok(Self {
            block_size,
            tuple_capacity_override: None,
        })
    }

    /// A layout capping blocks at an explicit number of tuples,
    /// regardless of the relation's estimated width. The byte budget
    /// still bounds oversized tuples.
    pub fn with_tuple_capacity(block_size: usize, capacity: u32) -> Result<Self> {
        let mut layout = Self::new(block_size)?;
        ensure!(capacity > 0, "tuple capacity must be positive");
        layout.tuple_capacity_override = Some(capacity);
        Ok(layout)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn tuple_capacity_override(&self) -> Option<u32> {
        self.tuple_capacity_override
    }

    /// Tuple capacity of a block built with this layout for `relation`.
    /// Always at least one; the byte budget rejects tuples that truly
    /// cannot fit.
    pub fn tuple_capacity(&self, relation: &RelationSchema) -> u32 {
        if let Some(capacity) = self.tuple_capacity_override {
            return capacity;
        }
        let width = relation.estimated_tuple_width().max(1);
        ((self.block_size / width) as u32).max(1)
    }
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            tuple_capacity_override: None,
        }
    }
}
