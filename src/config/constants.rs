//! # Configuration Constants
//!
//! This module centralizes the tunable constants of the insert layer,
//! grouping interdependent values together and documenting their
//! relationships. Constants that depend on each other are co-located to
//! prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_BLOCK_SIZE (2 MiB)
//!       │
//!       ├─> MIN_BLOCK_SIZE (must be <=)
//!       │     BlockLayout::new rejects sizes below the minimum; a
//!       │     block must hold at least one tuple of every supported
//!       │     fixed-width schema.
//!       │
//!       └─> Tuple capacity derivation
//!             capacity = block_size / estimated_tuple_width, floored
//!             to at least one tuple.
//!
//! STORAGE_SHARD_COUNT (64)
//!       │
//!       └─> Block-cache lock sharding. Blocks are assigned to shards
//!           via hash: (block_id * 31) % 64. More shards means less
//!           contention and more memory.
//!
//! TEXT_WIDTH_ESTIMATE / BLOB_WIDTH_ESTIMATE
//!       │
//!       └─> Estimated tuple width for variable-width attributes.
//!           Batch-mode admission uses the estimate instead of the
//!           exact encoded width, so a wildly wrong estimate skews
//!           block occupancy.
//! ```
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{DEFAULT_BLOCK_SIZE, STORAGE_SHARD_COUNT};
//! ```

// ============================================================================
// BLOCK GEOMETRY
// ============================================================================

/// Default size of a storage block in bytes (2 MiB).
/// This is the unit of allocation, pipelining, and scheduling.
pub const DEFAULT_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// Smallest block size a layout may request.
/// Below this, fixed-width tuples of even modest schemas stop fitting.
pub const MIN_BLOCK_SIZE: usize = 4096;

const _: () = assert!(
    MIN_BLOCK_SIZE <= DEFAULT_BLOCK_SIZE,
    "MIN_BLOCK_SIZE must not exceed DEFAULT_BLOCK_SIZE"
);

// ============================================================================
// SHARDING
// ============================================================================

/// Number of lock shards in the storage manager's block cache.
/// Higher values reduce contention but increase memory overhead.
pub const STORAGE_SHARD_COUNT: usize = 64;

const _: () = assert!(STORAGE_SHARD_COUNT > 0, "at least one cache shard");

// ============================================================================
// WIDTH ESTIMATES
// Variable-width attributes have no fixed size; these estimates feed the
// batch-mode admission path and the derived tuple capacity of a layout.
// ============================================================================

/// Estimated encoded width of a text value in bytes.
pub const TEXT_WIDTH_ESTIMATE: usize = 32;

/// Estimated encoded width of a blob value in bytes.
pub const BLOB_WIDTH_ESTIMATE: usize = 64;

// ============================================================================
// WIRE FORMATS
// ============================================================================

/// Version stamped into serialized insert-destination descriptors.
pub const DESCRIPTOR_VERSION: u32 = 1;
