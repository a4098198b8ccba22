//! # Storage Layer
//!
//! Blocks, block layouts, the storage manager, and the bulk-ingest
//! accessor seam. This layer knows nothing about insert strategies or
//! pipelines; it provides typed, exclusively-owned storage units that
//! the destination layer routes tuples into.
//!
//! ## Module Organization
//!
//! - `layout`: block geometry and tuple-capacity derivation
//! - `block`: the column-organized `StorageBlock` and its insert paths
//! - `manager`: sharded block cache with move-only checkout references
//! - `accessor`: the `ValueAccessor` bulk seam and `ColumnBatch`
//! - `tuple_ids`: tuple-id sequences for partitioned routing
//!
//! ## Ownership Model
//!
//! A block is mutated only through a `MutableBlockRef`, and at most one
//! such reference exists per block at any instant. The reference is
//! move-only; passing it between a pool and a worker transfers the sole
//! write capability, so block mutation needs no per-block lock.

mod accessor;
mod block;
mod layout;
mod manager;
mod tuple_ids;

pub use accessor::{AccessorGroup, ColumnBatch, ValueAccessor};
pub use block::StorageBlock;
pub use layout::BlockLayout;
pub use manager::{MutableBlockRef, StorageManager};
pub use tuple_ids::TupleIdSequence;

/// Globally unique identifier of a storage block.
pub type BlockId = u64;

/// Reserved id that never names a real block.
pub const INVALID_BLOCK_ID: BlockId = 0;
