//! Typed failure kinds of the insert layer.
//!
//! Fallible paths return `eyre::Result`; the variants below ride inside
//! the report so callers can recover the kind with `downcast_ref`:
//!
//! ```ignore
//! let err = destination.touched_blocks().unwrap_err();
//! assert!(matches!(
//!     err.downcast_ref::<DestinationError>(),
//!     Some(DestinationError::Precondition(_))
//! ));
//! ```
//!
//! Every kind except `UnsupportedOperation` (a programming error at the
//! call site) and `MalformedDescriptor` (surfaced at construction) is
//! fatal to the running query: the destination cannot partially succeed
//! without corrupting downstream pipeline accounting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DestinationError {
    /// A serialized insert-destination descriptor failed to decode or
    /// was inconsistent with the target relation.
    #[error("malformed insert destination descriptor: {0}")]
    MalformedDescriptor(String),

    /// A single tuple exceeds the capacity of an empty block; no
    /// allocation strategy can make progress.
    #[error("tuple of {tuple_bytes} bytes cannot fit in an empty block of {capacity_bytes} bytes")]
    FatalTupleSize {
        tuple_bytes: usize,
        capacity_bytes: usize,
    },

    /// A block-filled notification could not be delivered; consumers
    /// downstream would never learn about the block.
    #[error("pipeline notification for block {block_id} failed: {reason}")]
    PipelineBroken { block_id: u64, reason: String },

    /// The operation is not implemented by the selected strategy.
    #[error("{operation} is not supported by the {destination} destination")]
    UnsupportedOperation {
        operation: &'static str,
        destination: &'static str,
    },

    /// A teardown-ordering or call-once contract was violated.
    #[error("precondition violated: {0}")]
    Precondition(String),
}
