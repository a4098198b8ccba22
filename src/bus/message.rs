//! # Pipeline Message Wire Format
//!
//! The one message kind the insert layer emits: a block-filled
//! notification telling the scheduler that a block is ready for
//! downstream consumption.
//!
//! ## Layout
//!
//! The payload is a fixed 32-byte little-endian struct:
//!
//! ```text
//! Offset  Size  Description
//! 0       8     Operator index in the query plan DAG (u64)
//! 8       8     Block id (u64)
//! 16      8     Query id (u64)
//! 24      4     Relation id (u32)
//! 28      4     Partition id (u32, 0 when not partitioned)
//! ```
//!
//! Zerocopy little-endian field types make the in-memory struct the
//! wire format; `as_bytes`/`from_bytes` are free of copies and cannot
//! disagree with the table above.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::schema::{PartitionId, RelationId};
use crate::storage::BlockId;

/// Tag carried by block-filled notifications.
pub const KIND_DATA_PIPELINE: u32 = 1;

/// A kind-tagged payload, the bus's unit of delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedMessage {
    pub kind: u32,
    pub payload: Vec<u8>,
}

impl TaggedMessage {
    pub fn new(kind: u32, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataPipelineMessage {
    operator_index: U64,
    block_id: U64,
    query_id: U64,
    relation_id: U32,
    partition_id: U32,
}

pub const DATA_PIPELINE_MESSAGE_SIZE: usize = 32;

const _: () = assert!(std::mem::size_of::<DataPipelineMessage>() == DATA_PIPELINE_MESSAGE_SIZE);

impl DataPipelineMessage {
    pub fn new(
        operator_index: u64,
        block_id: BlockId,
        query_id: u64,
        relation_id: RelationId,
        partition_id: PartitionId,
    ) -> Self {
        Self {
            operator_index: U64::new(operator_index),
            block_id: U64::new(block_id),
            query_id: U64::new(query_id),
            relation_id: U32::new(relation_id),
            partition_id: U32::new(partition_id),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= DATA_PIPELINE_MESSAGE_SIZE,
            "buffer too small for DataPipelineMessage: {} < {}",
            bytes.len(),
            DATA_PIPELINE_MESSAGE_SIZE
        );
        Self::ref_from_bytes(&bytes[..DATA_PIPELINE_MESSAGE_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse DataPipelineMessage: {:?}", e))
    }

    pub fn to_tagged(self) -> TaggedMessage {
        TaggedMessage::new(KIND_DATA_PIPELINE, self.as_bytes().to_vec())
    }

    pub fn operator_index(&self) -> u64 {
        self.operator_index.get()
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id.get()
    }

    pub fn query_id(&self) -> u64 {
        self.query_id.get()
    }

    pub fn relation_id(&self) -> RelationId {
        self.relation_id.get()
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id.get()
    }
}
