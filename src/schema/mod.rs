//! # Catalog Metadata
//!
//! Read-only schema objects consumed by the insert layer: relation
//! definitions and partition scheme headers. Construction validates
//! internal consistency; afterwards everything here is immutable and
//! shared by reference.

mod partition;
mod relation;

pub use partition::{PartitionId, PartitionPolicy, PartitionSchemeHeader};
pub use relation::{AttributeDef, RelationId, RelationSchema};
