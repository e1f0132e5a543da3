//! Batch operations module.
//!
//! Bulk deletes and reads that exceed the per-request limits are split into
//! contiguous chunks:
//! - `batch_delete` - best-effort delete batches, one per chunk
//! - `transactional_batch_delete` - one atomic transaction per chunk
//! - `batch_get` - a single request, truncated to the engine limit
//!
//! Unprocessed items are reported, never retried.

mod chunk;
mod get;
mod write;

use std::sync::Arc;

use crate::engine::StorageEngine;

pub use chunk::{Chunk, chunk};
pub use get::BatchGetReport;
pub use write::{BatchDeleteReport, ChunkOutcome, ChunkStatus};

/// Maximum items per batch write request (DynamoDB limit).
pub const BATCH_WRITE_MAX_ITEMS: usize = 25;

/// Maximum keys per batch get request (DynamoDB limit).
pub const BATCH_GET_MAX_ITEMS: usize = 100;

/// Runs chunked bulk operations against one table.
#[derive(Clone)]
pub struct BatchChunker {
    engine: Arc<dyn StorageEngine>,
    table: String,
    chunk_concurrency: usize,
}

impl BatchChunker {
    /// `chunk_concurrency` is the number of chunks in flight; 1 runs them in order.
    pub fn new(engine: Arc<dyn StorageEngine>, table: impl Into<String>, chunk_concurrency: usize) -> Self {
        BatchChunker {
            engine,
            table: table.into(),
            chunk_concurrency: chunk_concurrency.max(1),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}
