//! Tuple-id sequences for partitioned bulk routing.
//!
//! One membership scan of an accessor produces one sequence per
//! partition; each sequence then drives a positional copy into that
//! partition's blocks.

use roaring::RoaringBitmap;

/// A set of row positions within one accessor batch.
#[derive(Debug, Clone, Default)]
pub struct TupleIdSequence {
    bits: RoaringBitmap,
}

impl TupleIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, position: u32) {
        self.bits.insert(position);
    }

    pub fn contains(&self, position: u32) -> bool {
        self.bits.contains(position)
    }

    pub fn len(&self) -> usize {
        self.bits.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter()
    }
}
