//! The [`ShardMalloc`] allocator and the per-shard lock domains it is built from.

pub(crate) mod shard;
pub mod shard_malloc;

pub use shard_malloc::{ShardMalloc, DEFAULT_SHARDS};
