//! # Relation Schema Definitions
//!
//! A `RelationSchema` describes the shape of one relation: its id, its
//! attributes in order, and the default block layout used when a
//! destination is constructed without a layout override.
//!
//! Schemas are immutable after construction and shared read-only via
//! `Arc` between the destination, the storage manager, and callers;
//! the insert layer never mutates catalog state.
//!
//! ## Example
//!
//! ```ignore
//! let relation = RelationSchema::new(
//!     7,
//!     "events",
//!     vec![
//!         AttributeDef::new("user_id", DataType::Int8),
//!         AttributeDef::new("payload", DataType::Text),
//!     ],
//! )?;
//! ```

use eyre::{ensure, Result};

use crate::storage::BlockLayout;
use crate::types::{AttributeId, DataType};

/// Identifies a relation within the catalog.
pub type RelationId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    name: String,
    data_type: DataType,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

#[derive(Debug, Clone)]
pub struct RelationSchema {
    id: RelationId,
    name: String,
    attributes: Vec<AttributeDef>,
    default_layout: BlockLayout,
}

impl RelationSchema {
    pub fn new(
        id: RelationId,
        name: impl Into<String>,
        attributes: Vec<AttributeDef>,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            !attributes.is_empty(),
            "relation '{}' must have at least one attribute",
            name
        );
        Ok(Self {
            id,
            name,
            attributes,
            default_layout: BlockLayout::default(),
        })
    }

    pub fn with_default_layout(mut self, layout: BlockLayout) -> Self {
        self.default_layout = layout;
        self
    }

    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.attributes.len()
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    /// Attribute ids are positional: attribute `i` is `attributes[i]`.
    pub fn attribute(&self, id: AttributeId) -> Option<&AttributeDef> {
        self.attributes.get(id as usize)
    }

    pub fn default_layout(&self) -> &BlockLayout {
        &self.default_layout
    }

    /// Estimated encoded width of one tuple of this relation, used for
    /// capacity derivation and batch-mode admission.
    pub fn estimated_tuple_width(&self) -> usize {
        self.attributes
            .iter()
            .map(|a| a.data_type().estimated_width())
            .sum()
    }
}
