//! # Quarry — Insert-Destination Layer
//!
//! Quarry is the materialization layer of a columnar, block-based
//! analytical storage engine: the component through which relational
//! operators (scans, joins, aggregations, sorts) write their output
//! tuples into durable, typed storage blocks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Worker threads (one operator)        │
//! ├─────────────────────────────────────────────┤
//! │   InsertDestination (strategy dispatch)     │
//! │   AlwaysNew │ BlockPool │ PartitionAware    │
//! ├──────────────────────┬──────────────────────┤
//! │   StorageManager     │   MessageBus         │
//! │   (block cache,      │   (block-filled      │
//! │    exclusive refs)   │    notifications)    │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! Many workers share one destination by reference. The destination
//! routes each tuple into a block under one of three allocation
//! strategies, hands every filled block to the scheduler immediately
//! so downstream operators can pipeline on it, keeps partially-filled
//! blocks alive for top-off, and reports the complete set of touched
//! blocks exactly once at operator teardown.
//!
//! ## Quick Start
//!
//! ```ignore
//! use quarry::{
//!     DestinationContext, InsertDestination, MemoryBus, MessageBus,
//!     StorageManager, Tuple, Value, WorkerClientMap,
//! };
//!
//! let bus = Arc::new(MemoryBus::new());
//! let scheduler = bus.register_client();
//! let worker_map = Arc::new(WorkerClientMap::new());
//! worker_map.bind_current(bus.register_client());
//!
//! let destination = InsertDestination::block_pool(
//!     DestinationContext {
//!         relation,
//!         layout: None,
//!         storage: Arc::new(StorageManager::new()),
//!         operator_index: 0,
//!         query_id: 1,
//!         scheduler_client_id: scheduler,
//!         bus,
//!         worker_map,
//!     },
//!     Vec::new(),
//! );
//! destination.insert_tuple(&Tuple::new(vec![Value::Int(1)]))?;
//! ```
//!
//! ## Module Overview
//!
//! - [`types`]: values, tuples, storage data types
//! - [`schema`]: relation schemas and partition scheme headers
//! - [`storage`]: blocks, layouts, accessors, the storage manager
//! - [`bus`]: pipeline messages and the bus seam
//! - [`dest`]: the three insert strategies and their wire descriptor
//!
//! ## Concurrency Model
//!
//! Parallel OS threads; no async runtime. Pool mutexes guard O(1)
//! bookkeeping only. Block mutation is lock-free by construction:
//! exclusive ownership of a `MutableBlockRef` is the write capability,
//! and at most one reference per block exists at any instant.

pub mod bus;
pub mod config;
pub mod dest;
pub mod error;
pub mod schema;
pub mod storage;
pub mod types;

pub use bus::{
    ClientId, DataPipelineMessage, MemoryBus, MessageBus, TaggedMessage, WorkerClientMap,
    KIND_DATA_PIPELINE,
};
pub use dest::{
    AlwaysNewDestination, BlockPoolDestination, DestinationContext, InsertDestination,
    InsertDestinationDescriptor, InsertDestinationKind, PartitionAwareDestination,
};
pub use error::DestinationError;
pub use schema::{
    AttributeDef, PartitionId, PartitionPolicy, PartitionSchemeHeader, RelationId, RelationSchema,
};
pub use storage::{
    AccessorGroup, BlockId, BlockLayout, ColumnBatch, MutableBlockRef, StorageBlock,
    StorageManager, TupleIdSequence, ValueAccessor, INVALID_BLOCK_ID,
};
pub use types::{AttributeId, DataType, Tuple, Value};
