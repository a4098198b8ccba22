//! # Value Accessors
//!
//! A `ValueAccessor` is the bulk-ingest seam between upstream operators
//! and the insert layer: a cursor over a batch of rows that also
//! supports random access by position. Blocks consume accessors
//! incrementally — a block that fills mid-batch simply stops pulling,
//! and the next block resumes from the cursor's current state.
//!
//! ## Cursor Protocol
//!
//! ```text
//! while accessor.next() {
//!     let v = accessor.value(attr);          // current row
//!     let p = accessor.current_position();   // stable row index
//! }
//! assert!(accessor.exhausted());
//! ```
//!
//! `exhausted()` turns true only after a `next()` call has returned
//! false; a fully-consumed-but-not-yet-observed cursor is not
//! exhausted. Partitioned bulk ingest ignores the cursor entirely and
//! reads rows by position via `value_at`.

use crate::types::{AttributeId, Value};

pub trait ValueAccessor: Send {
    fn num_tuples(&self) -> usize;

    fn num_attributes(&self) -> usize;

    /// Advances the cursor. Returns false once the batch is consumed.
    fn next(&mut self) -> bool;

    /// Row index of the cursor. Only valid after a successful `next`.
    fn current_position(&self) -> usize;

    /// True once `next` has returned false.
    fn exhausted(&self) -> bool;

    /// Value of `attribute` at the cursor.
    fn value(&self, attribute: AttributeId) -> &Value;

    /// Value of `attribute` at an arbitrary row.
    fn value_at(&self, position: usize, attribute: AttributeId) -> &Value;
}

/// One accessor's contribution to a composed bulk insert.
///
/// `attribute_map[j]` names the destination attribute filled by the
/// accessor's column `j`. Groups advance in lock step; together they
/// must cover every destination attribute exactly once.
pub struct AccessorGroup<'a> {
    pub accessor: &'a mut dyn ValueAccessor,
    pub attribute_map: Vec<AttributeId>,
}

impl<'a> AccessorGroup<'a> {
    pub fn new(accessor: &'a mut dyn ValueAccessor, attribute_map: Vec<AttributeId>) -> Self {
        Self {
            accessor,
            attribute_map,
        }
    }
}

/// An in-memory columnar batch: one value vector per attribute.
#[derive(Debug, Clone)]
pub struct ColumnBatch {
    columns: Vec<Vec<Value>>,
    num_tuples: usize,
    position: Option<usize>,
    exhausted: bool,
}

impl ColumnBatch {
    pub fn new(columns: Vec<Vec<Value>>) -> eyre::Result<Self> {
        eyre::ensure!(!columns.is_empty(), "a column batch needs at least one column");
        let num_tuples = columns[0].len();
        for (i, column) in columns.iter().enumerate() {
            eyre::ensure!(
                column.len() == num_tuples,
                "ragged column batch: column {} has {} rows, column 0 has {}",
                i,
                column.len(),
                num_tuples
            );
        }
        Ok(Self {
            columns,
            num_tuples,
            position: None,
            exhausted: false,
        })
    }

    /// Builds a batch by transposing a tuple slice.
    pub fn from_tuples(tuples: &[crate::types::Tuple]) -> eyre::Result<Self> {
        eyre::ensure!(!tuples.is_empty(), "cannot build a column batch from zero tuples");
        let arity = tuples[0].arity();
        let mut columns = vec![Vec::with_capacity(tuples.len()); arity];
        for tuple in tuples {
            eyre::ensure!(
                tuple.arity() == arity,
                "ragged tuple slice: expected arity {}, found {}",
                arity,
                tuple.arity()
            );
            for (column, value) in columns.iter_mut().zip(tuple.values()) {
                column.push(value.clone());
            }
        }
        Ok(Self {
            num_tuples: tuples.len(),
            columns,
            position: None,
            exhausted: false,
        })
    }
}

impl ValueAccessor for ColumnBatch {
    fn num_tuples(&self) -> usize {
        self.num_tuples
    }

    fn num_attributes(&self) -> usize {
        self.columns.len()
    }

    fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.num_tuples {
            self.position = Some(next);
            true
        } else {
            self.exhausted = true;
            false
        }
    }

    fn current_position(&self) -> usize {
        self.position.expect("cursor not started") // INVARIANT: only called after next() returned true
    }

    fn exhausted(&self) -> bool {
        self.exhausted
    }

    fn value(&self, attribute: AttributeId) -> &Value {
        &self.columns[attribute as usize][self.current_position()]
    }

    fn value_at(&self, position: usize, attribute: AttributeId) -> &Value {
        &self.columns[attribute as usize][position]
    }
}
