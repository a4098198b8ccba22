//! # Storage Blocks
//!
//! A `StorageBlock` is the fixed-capacity, column-organized unit that
//! tuples are materialized into. Each block binds to one relation and
//! holds one value vector per attribute plus occupancy accounting.
//!
//! ## Admission
//!
//! A block admits a tuple while both budgets hold:
//!
//! - tuple budget: `tuple_count < capacity_tuples` (from the layout)
//! - byte budget: `used_bytes + width <= capacity_bytes`
//!
//! The single-tuple path charges the exact encoded width of the tuple.
//! The batch and bulk paths charge the relation's estimated width
//! instead, deferring per-tuple measurement in exchange for slightly
//! coarser occupancy.
//!
//! ## Bulk Paths
//!
//! - `bulk_insert`: drain a cursor until the block fills or the batch
//!   ends; the cursor's residual state belongs to the next block.
//! - `bulk_insert_positions`: positional copy driven by an explicit
//!   tuple-id iterator (partition routing); unconsumed positions stay
//!   in the iterator for the next block.
//! - `bulk_insert_grouped`: lock-step composition of several accessors,
//!   each contributing a disjoint subset of destination attributes.

use std::iter::Peekable;

use eyre::{ensure, Result};

use crate::schema::{RelationId, RelationSchema};
use crate::storage::{AccessorGroup, BlockId, BlockLayout, ValueAccessor};
use crate::types::{AttributeId, Tuple, Value};

#[derive(Debug)]
pub struct StorageBlock {
    id: BlockId,
    relation_id: RelationId,
    columns: Vec<Vec<Value>>,
    estimated_tuple_width: usize,
    capacity_bytes: usize,
    capacity_tuples: u32,
    used_bytes: usize,
}

impl StorageBlock {
    pub(crate) fn new(id: BlockId, relation: &RelationSchema, layout: &BlockLayout) -> Self {
        Self {
            id,
            relation_id: relation.id(),
            columns: vec![Vec::new(); relation.arity()],
            estimated_tuple_width: relation.estimated_tuple_width().max(1),
            capacity_bytes: layout.block_size(),
            capacity_tuples: layout.tuple_capacity(relation),
            used_bytes: 0,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn relation_id(&self) -> RelationId {
        self.relation_id
    }

    pub fn tuple_count(&self) -> u32 {
        self.columns[0].len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.tuple_count() == 0
    }

    /// True when the block cannot admit another tuple of estimated
    /// width. The exact-width path may still reject earlier for fat
    /// tuples, or admit a final slim one.
    pub fn is_full(&self) -> bool {
        self.tuple_count() >= self.capacity_tuples
            || self.used_bytes + self.estimated_tuple_width > self.capacity_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn capacity_tuples(&self) -> u32 {
        self.capacity_tuples
    }

    /// One attribute's values, for scan-side consumers and verification.
    pub fn column(&self, attribute: AttributeId) -> &[Value] {
        &self.columns[attribute as usize]
    }

    /// Appends one tuple with exact byte accounting. Returns false if
    /// the tuple does not fit.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> bool {
        debug_assert_eq!(tuple.arity(), self.columns.len());
        let width = tuple.byte_width();
        if self.tuple_count() >= self.capacity_tuples
            || self.used_bytes + width > self.capacity_bytes
        {
            return false;
        }
        for (column, value) in self.columns.iter_mut().zip(tuple.values()) {
            column.push(value.clone());
        }
        self.used_bytes += width;
        true
    }

    /// Appends one tuple charging the estimated width, deferring exact
    /// measurement. Returns false if the block is at estimated
    /// capacity.
    pub fn insert_tuple_in_batch(&mut self, tuple: &Tuple) -> bool {
        debug_assert_eq!(tuple.arity(), self.columns.len());
        if self.is_full() {
            return false;
        }
        for (column, value) in self.columns.iter_mut().zip(tuple.values()) {
            column.push(value.clone());
        }
        self.used_bytes += self.estimated_tuple_width;
        true
    }

    /// Drains `accessor` into this block until the block fills or the
    /// batch ends. With `attribute_map`, destination attribute `i`
    /// reads accessor attribute `attribute_map[i]`. Returns the number
    /// of tuples copied.
    pub fn bulk_insert(
        &mut self,
        accessor: &mut dyn ValueAccessor,
        attribute_map: Option<&[AttributeId]>,
    ) -> usize {
        let mut copied = 0;
        while !self.is_full() && accessor.next() {
            for (i, column) in self.columns.iter_mut().enumerate() {
                let source = attribute_map.map_or(i as AttributeId, |m| m[i]);
                column.push(accessor.value(source).clone());
            }
            self.used_bytes += self.estimated_tuple_width;
            copied += 1;
        }
        copied
    }

    /// Copies the rows named by `positions` until the block fills or
    /// the iterator ends. Consumed positions are removed from the
    /// iterator; the remainder belongs to the next block.
    pub fn bulk_insert_positions<I>(
        &mut self,
        accessor: &dyn ValueAccessor,
        positions: &mut Peekable<I>,
        attribute_map: Option<&[AttributeId]>,
    ) -> usize
    where
        I: Iterator<Item = u32>,
    {
        let mut copied = 0;
        while !self.is_full() {
            let Some(&position) = positions.peek() else {
                break;
            };
            for (i, column) in self.columns.iter_mut().enumerate() {
                let source = attribute_map.map_or(i as AttributeId, |m| m[i]);
                column.push(accessor.value_at(position as usize, source).clone());
            }
            self.used_bytes += self.estimated_tuple_width;
            positions.next();
            copied += 1;
        }
        copied
    }

    /// Advances all grouped accessors in lock step, composing one
    /// logical row per step. Each group's `attribute_map[j]` names the
    /// destination attribute filled by the group's column `j`. The
    /// caller guarantees the groups cover every destination attribute
    /// exactly once.
    pub fn bulk_insert_grouped(&mut self, groups: &mut [AccessorGroup<'_>]) -> Result<usize> {
        let mut copied = 0;
        'rows: while !self.is_full() {
            for (k, group) in groups.iter_mut().enumerate() {
                let advanced = group.accessor.next();
                if !advanced {
                    ensure!(
                        k == 0,
                        "grouped accessors are misaligned: accessor {} ended early",
                        k
                    );
                    break 'rows;
                }
            }
            for group in groups.iter() {
                for (j, &dest) in group.attribute_map.iter().enumerate() {
                    let value = group.accessor.value(j as AttributeId).clone();
                    self.columns[dest as usize].push(value);
                }
            }
            self.used_bytes += self.estimated_tuple_width;
            copied += 1;
        }
        Ok(copied)
    }
}
