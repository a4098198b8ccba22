mod constants;

pub use constants::{
    BLOB_WIDTH_ESTIMATE, DEFAULT_BLOCK_SIZE, DESCRIPTOR_VERSION, MIN_BLOCK_SIZE,
    STORAGE_SHARD_COUNT, TEXT_WIDTH_ESTIMATE,
};
