//! # Insert-Destination Descriptors
//!
//! The optimizer describes a destination on the wire; workers rebuild
//! the live strategy from that description. A descriptor carries the
//! strategy tag, an optional partition scheme, and optional seed block
//! lists (flat for the block pool, nested per-partition for the
//! partition-aware strategy).
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Description
//! 0       16    Magic: "QryInsertDest\x00\x00\x00"
//! 16      4     Version (u32 little-endian)
//! 20      1     Strategy tag (0 always / 1 pool / 2 partition-aware)
//! 21      1     Scheme present flag (0 or 1)
//!         ...   Scheme, if present:
//!                 num_partitions: u32
//!                 attribute_count: u16, attribute ids: u32 each
//!                 policy: u8 (0 hash, 1 range)
//!                 range only: split_count: u32, encoded values
//!         ...   Seed blocks:
//!                 pool: count: u32, ids: u64 each
//!                 partition-aware: per partition, count: u32 + ids
//! ```
//!
//! Split-point values encode as a one-byte tag plus a little-endian
//! payload (null / bool / int / float / text / blob). Any truncation,
//! bad magic, unknown tag, or trailing garbage decodes to a malformed-
//! descriptor error; decoding never panics on hostile input.

use eyre::Result;

use crate::config::DESCRIPTOR_VERSION;
use crate::dest::InsertDestinationKind;
use crate::error::DestinationError;
use crate::schema::{PartitionPolicy, PartitionSchemeHeader, RelationSchema};
use crate::storage::BlockId;
use crate::types::Value;

const DESCRIPTOR_MAGIC: &[u8; 16] = b"QryInsertDest\x00\x00\x00";

#[derive(Debug, Clone, PartialEq)]
pub struct InsertDestinationDescriptor {
    kind: InsertDestinationKind,
    partition_scheme: Option<PartitionSchemeHeader>,
    seed_blocks: Vec<BlockId>,
    partition_seed_blocks: Vec<Vec<BlockId>>,
}

impl InsertDestinationDescriptor {
    pub fn always_create() -> Self {
        Self {
            kind: InsertDestinationKind::AlwaysCreateBlock,
            partition_scheme: None,
            seed_blocks: Vec::new(),
            partition_seed_blocks: Vec::new(),
        }
    }

    pub fn block_pool(seed_blocks: Vec<BlockId>) -> Self {
        Self {
            kind: InsertDestinationKind::BlockPool,
            partition_scheme: None,
            seed_blocks,
            partition_seed_blocks: Vec::new(),
        }
    }

    pub fn partition_aware(
        scheme: PartitionSchemeHeader,
        mut partition_seed_blocks: Vec<Vec<BlockId>>,
    ) -> Self {
        if partition_seed_blocks.is_empty() {
            partition_seed_blocks = vec![Vec::new(); scheme.num_partitions() as usize];
        }
        Self {
            kind: InsertDestinationKind::PartitionAware,
            partition_scheme: Some(scheme),
            seed_blocks: Vec::new(),
            partition_seed_blocks,
        }
    }

    pub fn kind(&self) -> InsertDestinationKind {
        self.kind
    }

    pub fn partition_scheme(&self) -> Option<&PartitionSchemeHeader> {
        self.partition_scheme.as_ref()
    }

    pub fn seed_blocks(&self) -> &[BlockId] {
        &self.seed_blocks
    }

    pub fn partition_seed_blocks(&self) -> &[Vec<BlockId>] {
        &self.partition_seed_blocks
    }

    /// Whether this descriptor can construct a destination for
    /// `relation`: the tag is recognized by construction; a
    /// partition-aware descriptor additionally needs a scheme
    /// consistent with the relation and exactly one seed list per
    /// partition; the other kinds must not carry partition state.
    pub fn is_valid_for(&self, relation: &RelationSchema) -> bool {
        match self.kind {
            InsertDestinationKind::AlwaysCreateBlock => {
                self.partition_scheme.is_none()
                    && self.seed_blocks.is_empty()
                    && self.partition_seed_blocks.is_empty()
            }
            InsertDestinationKind::BlockPool => {
                self.partition_scheme.is_none() && self.partition_seed_blocks.is_empty()
            }
            InsertDestinationKind::PartitionAware => match &self.partition_scheme {
                Some(scheme) => {
                    scheme.validate_for(relation).is_ok()
                        && self.seed_blocks.is_empty()
                        && self.partition_seed_blocks.len() == scheme.num_partitions() as usize
                }
                None => false,
            },
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(DESCRIPTOR_MAGIC);
        buf.extend_from_slice(&DESCRIPTOR_VERSION.to_le_bytes());
        buf.push(self.kind as u8);

        match &self.partition_scheme {
            Some(scheme) => {
                buf.push(1);
                buf.extend_from_slice(&scheme.num_partitions().to_le_bytes());
                buf.extend_from_slice(&(scheme.attribute_ids().len() as u16).to_le_bytes());
                for &attribute in scheme.attribute_ids() {
                    buf.extend_from_slice(&attribute.to_le_bytes());
                }
                match scheme.policy() {
                    PartitionPolicy::Hash => buf.push(0),
                    PartitionPolicy::Range { split_points } => {
                        buf.push(1);
                        buf.extend_from_slice(&(split_points.len() as u32).to_le_bytes());
                        for value in split_points {
                            encode_value(value, &mut buf);
                        }
                    }
                }
            }
            None => buf.push(0),
        }

        match self.kind {
            InsertDestinationKind::AlwaysCreateBlock => {}
            InsertDestinationKind::BlockPool => {
                buf.extend_from_slice(&(self.seed_blocks.len() as u32).to_le_bytes());
                for &id in &self.seed_blocks {
                    buf.extend_from_slice(&id.to_le_bytes());
                }
            }
            InsertDestinationKind::PartitionAware => {
                for seeds in &self.partition_seed_blocks {
                    buf.extend_from_slice(&(seeds.len() as u32).to_le_bytes());
                    for &id in seeds {
                        buf.extend_from_slice(&id.to_le_bytes());
                    }
                }
            }
        }

        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let magic = reader.take(16)?;
        if magic != DESCRIPTOR_MAGIC {
            return Err(malformed("bad magic bytes"));
        }
        let version = reader.read_u32()?;
        if version != DESCRIPTOR_VERSION {
            return Err(malformed(format!(
                "unsupported version {version} (expected {DESCRIPTOR_VERSION})"
            )));
        }

        let kind = InsertDestinationKind::from_tag(reader.read_u8()?)
            .ok_or_else(|| malformed("unknown strategy tag"))?;

        let partition_scheme = match reader.read_u8()? {
            0 => None,
            1 => {
                let num_partitions = reader.read_u32()?;
                let attribute_count = reader.read_u16()? as usize;
                let mut attribute_ids = Vec::with_capacity(attribute_count);
                for _ in 0..attribute_count {
                    attribute_ids.push(reader.read_u32()?);
                }
                let policy = match reader.read_u8()? {
                    0 => PartitionPolicy::Hash,
                    1 => {
                        let split_count = reader.read_u32()? as usize;
                        let mut split_points = Vec::with_capacity(split_count);
                        for _ in 0..split_count {
                            split_points.push(decode_value(&mut reader)?);
                        }
                        PartitionPolicy::Range { split_points }
                    }
                    tag => return Err(malformed(format!("unknown partition policy {tag}"))),
                };
                let scheme =
                    PartitionSchemeHeader::from_parts(num_partitions, attribute_ids, policy)
                        .map_err(|e| malformed(e.to_string()))?;
                Some(scheme)
            }
            flag => return Err(malformed(format!("bad scheme-present flag {flag}"))),
        };

        let mut seed_blocks = Vec::new();
        let mut partition_seed_blocks = Vec::new();
        match kind {
            InsertDestinationKind::AlwaysCreateBlock => {}
            InsertDestinationKind::BlockPool => {
                let count = reader.read_u32()? as usize;
                for _ in 0..count {
                    seed_blocks.push(reader.read_u64()?);
                }
            }
            InsertDestinationKind::PartitionAware => {
                let Some(scheme) = &partition_scheme else {
                    return Err(malformed("partition-aware descriptor without a scheme"));
                };
                for _ in 0..scheme.num_partitions() {
                    let count = reader.read_u32()? as usize;
                    let mut seeds = Vec::with_capacity(count);
                    for _ in 0..count {
                        seeds.push(reader.read_u64()?);
                    }
                    partition_seed_blocks.push(seeds);
                }
            }
        }

        if !reader.is_empty() {
            return Err(malformed("trailing bytes after descriptor"));
        }

        Ok(Self {
            kind,
            partition_scheme,
            seed_blocks,
            partition_seed_blocks,
        })
    }
}

fn malformed(reason: impl Into<String>) -> eyre::Report {
    DestinationError::MalformedDescriptor(reason.into()).into()
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(0),
        Value::Bool(b) => {
            buf.push(1);
            buf.push(u8::from(*b));
        }
        Value::Int(i) => {
            buf.push(2);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(3);
            buf.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Value::Text(s) => {
            buf.push(4);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Blob(b) => {
            buf.push(5);
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
    }
}

fn decode_value(reader: &mut Reader<'_>) -> Result<Value> {
    let value = match reader.read_u8()? {
        0 => Value::Null,
        1 => Value::Bool(reader.read_u8()? != 0),
        2 => Value::Int(i64::from_le_bytes(reader.take(8)?.try_into().unwrap())),
        3 => Value::Float(f64::from_bits(u64::from_le_bytes(
            reader.take(8)?.try_into().unwrap(),
        ))),
        4 => {
            let len = reader.read_u32()? as usize;
            let bytes = reader.take(len)?;
            Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|_| malformed("split point is not valid UTF-8"))?
                    .to_owned(),
            )
        }
        5 => {
            let len = reader.read_u32()? as usize;
            Value::Blob(reader.take(len)?.to_vec())
        }
        tag => return Err(malformed(format!("unknown value tag {tag}"))),
    };
    Ok(value)
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| malformed("descriptor is truncated"))?;
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn is_empty(&self) -> bool {
        self.offset == self.buf.len()
    }
}
