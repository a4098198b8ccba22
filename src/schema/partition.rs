//! # Partition Scheme Header
//!
//! A `PartitionSchemeHeader` maps tuples of a partitioned relation to
//! the partition that must hold them. Routing is a pure function of the
//! declared partition attributes: two tuples with equal values on those
//! attributes always land in the same partition, across threads, runs,
//! and machines.
//!
//! ## Policies
//!
//! - **Hash**: a deterministic FNV fold of the partition values modulo
//!   `num_partitions`. Works for any attribute combination.
//! - **Range**: a sorted list of split points over a single attribute;
//!   partition `p` holds values in `[split[p-1], split[p])`, with the
//!   first and last partitions open-ended. `num_partitions` must equal
//!   `split_points.len() + 1`.
//!
//! ## Corruption
//!
//! A computed partition id outside `[0, num_partitions)` means the
//! header itself is corrupt; routing fails rather than silently
//! misplacing tuples.

use eyre::{bail, ensure, Result};

use crate::schema::RelationSchema;
use crate::types::{AttributeId, Value};

/// Index of a partition within a partitioned relation.
pub type PartitionId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionPolicy {
    Hash,
    Range { split_points: Vec<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSchemeHeader {
    num_partitions: u32,
    attribute_ids: Vec<AttributeId>,
    policy: PartitionPolicy,
}

impl PartitionSchemeHeader {
    pub fn hash(num_partitions: u32, attribute_ids: Vec<AttributeId>) -> Result<Self> {
        ensure!(num_partitions > 0, "a partition scheme needs at least one partition");
        Ok(Self {
            num_partitions,
            attribute_ids,
            policy: PartitionPolicy::Hash,
        })
    }

    pub fn range(attribute_id: AttributeId, split_points: Vec<Value>) -> Result<Self> {
        ensure!(
            !split_points.is_empty(),
            "a range partition scheme needs at least one split point"
        );
        for pair in split_points.windows(2) {
            ensure!(
                pair[0].total_cmp(&pair[1]).is_lt(),
                "range split points must be strictly ascending"
            );
        }
        Ok(Self {
            num_partitions: split_points.len() as u32 + 1,
            attribute_ids: vec![attribute_id],
            policy: PartitionPolicy::Range { split_points },
        })
    }

    pub(crate) fn from_parts(
        num_partitions: u32,
        attribute_ids: Vec<AttributeId>,
        policy: PartitionPolicy,
    ) -> Result<Self> {
        ensure!(num_partitions > 0, "a partition scheme needs at least one partition");
        if let PartitionPolicy::Range { split_points } = &policy {
            ensure!(
                attribute_ids.len() == 1,
                "range partitioning is defined over exactly one attribute"
            );
            ensure!(
                num_partitions as usize == split_points.len() + 1,
                "range scheme declares {} partitions but {} split points",
                num_partitions,
                split_points.len()
            );
        }
        Ok(Self {
            num_partitions,
            attribute_ids,
            policy,
        })
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    /// Attribute ids the routing function reads, in declaration order.
    /// Empty means the producer assigns partitions explicitly.
    pub fn attribute_ids(&self) -> &[AttributeId] {
        &self.attribute_ids
    }

    pub fn policy(&self) -> &PartitionPolicy {
        &self.policy
    }

    /// Checks that this scheme can partition `relation`: every routing
    /// attribute must exist, and a range policy must be single-attribute
    /// with a consistent partition count.
    pub fn validate_for(&self, relation: &RelationSchema) -> Result<()> {
        for &attr in &self.attribute_ids {
            ensure!(
                relation.attribute(attr).is_some(),
                "partition attribute {} does not exist in relation '{}'",
                attr,
                relation.name()
            );
        }
        if let PartitionPolicy::Range { split_points } = &self.policy {
            ensure!(
                self.attribute_ids.len() == 1,
                "range partitioning is defined over exactly one attribute"
            );
            ensure!(
                self.num_partitions as usize == split_points.len() + 1,
                "range scheme declares {} partitions but {} split points",
                self.num_partitions,
                split_points.len()
            );
        }
        Ok(())
    }

    /// Routes one tuple's partition-attribute values to its partition.
    ///
    /// `values` must be the partition attributes in declaration order.
    pub fn partition_id_for(&self, values: &[&Value]) -> Result<PartitionId> {
        ensure!(
            values.len() == self.attribute_ids.len(),
            "expected {} partition values, got {}",
            self.attribute_ids.len(),
            values.len()
        );

        let id = match &self.policy {
            PartitionPolicy::Hash => {
                (Value::stable_hash_slice(values) % u64::from(self.num_partitions)) as u32
            }
            PartitionPolicy::Range { split_points } => {
                let value = values[0];
                split_points
                    .iter()
                    .position(|split| value.total_cmp(split).is_lt())
                    .unwrap_or(split_points.len()) as u32
            }
        };

        if id >= self.num_partitions {
            bail!(
                "partition scheme routed a tuple to partition {} of {} (corrupt header)",
                id,
                self.num_partitions
            );
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDef;
    use crate::types::DataType;

    fn relation() -> RelationSchema {
        RelationSchema::new(
            1,
            "t",
            vec![
                AttributeDef::new("k", DataType::Int8),
                AttributeDef::new("v", DataType::Text),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_hash_routing_is_deterministic() {
        let scheme = PartitionSchemeHeader::hash(8, vec![0]).unwrap();
        let v = Value::Int(42);
        let first = scheme.partition_id_for(&[&v]).unwrap();
        for _ in 0..100 {
            assert_eq!(scheme.partition_id_for(&[&v]).unwrap(), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn test_hash_spreads_distinct_keys() {
        let scheme = PartitionSchemeHeader::hash(4, vec![0]).unwrap();
        let mut seen = [false; 4];
        for i in 0..64 {
            let v = Value::Int(i);
            seen[scheme.partition_id_for(&[&v]).unwrap() as usize] = true;
        }
        assert!(seen.iter().all(|&s| s), "64 keys over 4 partitions left a partition empty");
    }

    #[test]
    fn test_range_routing_boundaries() {
        let scheme =
            PartitionSchemeHeader::range(0, vec![Value::Int(10), Value::Int(20)]).unwrap();
        assert_eq!(scheme.num_partitions(), 3);

        let cases = [(-5, 0), (9, 0), (10, 1), (19, 1), (20, 2), (100, 2)];
        for (key, expected) in cases {
            let v = Value::Int(key);
            assert_eq!(scheme.partition_id_for(&[&v]).unwrap(), expected, "key {key}");
        }
    }

    #[test]
    fn test_range_requires_ascending_splits() {
        assert!(PartitionSchemeHeader::range(0, vec![Value::Int(5), Value::Int(5)]).is_err());
        assert!(PartitionSchemeHeader::range(0, vec![Value::Int(9), Value::Int(2)]).is_err());
    }

    #[test]
    fn test_validate_against_relation() {
        let rel = relation();
        assert!(PartitionSchemeHeader::hash(4, vec![0, 1]).unwrap().validate_for(&rel).is_ok());
        assert!(PartitionSchemeHeader::hash(4, vec![2]).unwrap().validate_for(&rel).is_err());
    }

    #[test]
    fn test_value_count_mismatch_rejected() {
        let scheme = PartitionSchemeHeader::hash(4, vec![0, 1]).unwrap();
        let v = Value::Int(1);
        assert!(scheme.partition_id_for(&[&v]).is_err());
    }
}
