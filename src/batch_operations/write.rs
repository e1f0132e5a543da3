//! Chunked delete operations.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use super::{BATCH_WRITE_MAX_ITEMS, BatchChunker, Chunk, chunk};
use crate::engine::{Item, Key, TransactAction};
use crate::errors::{AccessError, EngineError, Result};
use crate::transaction_operations::TRANSACTION_MAX_ITEMS;

/// How one delete batch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    Succeeded,
    /// The engine accepted the request but left these keys undeleted.
    Unprocessed(Vec<Item>),
    Failed(EngineError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub ordinal: usize,
    pub size: usize,
    pub status: ChunkStatus,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ChunkStatus::Succeeded)
    }
}

/// Per-chunk outcomes of a best-effort batch delete, in chunk order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDeleteReport {
    pub outcomes: Vec<ChunkOutcome>,
}

impl BatchDeleteReport {
    pub fn chunk_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(ChunkOutcome::is_success)
    }

    /// Ordinals of chunks that failed or left keys unprocessed.
    pub fn failed_ordinals(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| outcome.ordinal)
            .collect()
    }

    /// Keys the engine reported as unprocessed, across all chunks.
    pub fn unprocessed_keys(&self) -> Vec<&Item> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.status {
                ChunkStatus::Unprocessed(keys) => Some(keys.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// `PartialBatchFailure` unless every chunk fully succeeded.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed_ordinals();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(AccessError::PartialBatchFailure {
                failed,
                total: self.chunk_count(),
            })
        }
    }
}

fn validate_keys(keys: &[Key]) -> Result<()> {
    keys.iter()
        .try_for_each(|key| key.validate())
        .map_err(AccessError::Validation)
}

impl BatchChunker {
    /// Delete `keys` in non-transactional batches of `chunk_size`.
    ///
    /// A failing chunk does not stop later chunks. The returned report holds
    /// one outcome per chunk; call [`BatchDeleteReport::into_result`] to treat
    /// any incomplete chunk as an error.
    pub async fn batch_delete(&self, keys: &[Key], chunk_size: usize) -> Result<BatchDeleteReport> {
        if chunk_size == 0 || chunk_size > BATCH_WRITE_MAX_ITEMS {
            return Err(AccessError::Validation(format!(
                "batch delete chunk size must be between 1 and {} (got {})",
                BATCH_WRITE_MAX_ITEMS, chunk_size
            )));
        }
        validate_keys(keys)?;

        let chunks = chunk(keys, chunk_size)?;
        info!(
            table = %self.table,
            keys = keys.len(),
            chunk_size,
            batches = chunks.len(),
            "Deleting keys in batches"
        );

        let outcomes = stream::iter(chunks)
            .map(|chunk| self.delete_chunk(chunk))
            .buffered(self.chunk_concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = BatchDeleteReport { outcomes };
        if !report.is_complete() {
            warn!(
                table = %self.table,
                failed = ?report.failed_ordinals(),
                total = report.chunk_count(),
                "Batch delete finished with incomplete chunks"
            );
        }
        Ok(report)
    }

    async fn delete_chunk(&self, chunk: Chunk<Key>) -> ChunkOutcome {
        let size = chunk.items.len();
        debug!(table = %self.table, ordinal = chunk.ordinal, size, "Submitting delete batch");

        let status = match self.engine.batch_delete(&self.table, &chunk.items).await {
            Ok(output) if output.unprocessed.is_empty() => ChunkStatus::Succeeded,
            Ok(output) => {
                warn!(
                    table = %self.table,
                    ordinal = chunk.ordinal,
                    unprocessed = output.unprocessed.len(),
                    "Delete batch left keys unprocessed"
                );
                ChunkStatus::Unprocessed(output.unprocessed)
            }
            Err(err) => {
                error!(table = %self.table, ordinal = chunk.ordinal, error = %err, "Delete batch failed");
                ChunkStatus::Failed(err)
            }
        };

        ChunkOutcome {
            ordinal: chunk.ordinal,
            size,
            status,
        }
    }

    /// Delete `keys` with one atomic transaction per chunk of `chunk_size`.
    ///
    /// Chunks are independent: a failed chunk rolls back only itself. Returns
    /// chunk ordinal to success.
    pub async fn transactional_batch_delete(
        &self,
        keys: &[Key],
        chunk_size: usize,
    ) -> Result<BTreeMap<usize, bool>> {
        if chunk_size == 0 || chunk_size > TRANSACTION_MAX_ITEMS {
            return Err(AccessError::Validation(format!(
                "transactional chunk size must be between 1 and {} (got {})",
                TRANSACTION_MAX_ITEMS, chunk_size
            )));
        }
        validate_keys(keys)?;

        let chunks = chunk(keys, chunk_size)?;
        info!(
            table = %self.table,
            keys = keys.len(),
            chunk_size,
            batches = chunks.len(),
            "Deleting keys transactionally"
        );

        let results = stream::iter(chunks)
            .map(|chunk| self.delete_chunk_atomically(chunk))
            .buffered(self.chunk_concurrency)
            .collect::<BTreeMap<_, _>>()
            .await;
        Ok(results)
    }

    async fn delete_chunk_atomically(&self, chunk: Chunk<Key>) -> (usize, bool) {
        let actions = chunk
            .items
            .into_iter()
            .map(|key| TransactAction::Delete {
                table: self.table.clone(),
                key,
                condition: None,
            })
            .collect();

        match self.engine.transact_write(actions).await {
            Ok(()) => {
                debug!(table = %self.table, ordinal = chunk.ordinal, "Transactional delete committed");
                (chunk.ordinal, true)
            }
            Err(err) => {
                error!(
                    table = %self.table,
                    ordinal = chunk.ordinal,
                    error = %err,
                    "Transactional delete failed"
                );
                (chunk.ordinal, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ordinal: usize, status: ChunkStatus) -> ChunkOutcome {
        ChunkOutcome {
            ordinal,
            size: 25,
            status,
        }
    }

    #[test]
    fn report_with_failures_converts_to_partial_failure() {
        let report = BatchDeleteReport {
            outcomes: vec![
                outcome(1, ChunkStatus::Succeeded),
                outcome(2, ChunkStatus::Failed(EngineError::Throttled("slow".into()))),
                outcome(3, ChunkStatus::Unprocessed(vec![Key::string("pk", "x").to_item()])),
            ],
        };
        assert_eq!(report.unprocessed_keys().len(), 1);
        match report.into_result() {
            Err(AccessError::PartialBatchFailure { failed, total }) => {
                assert_eq!(failed, [2, 3]);
                assert_eq!(total, 3);
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
    }

    #[test]
    fn empty_report_is_complete() {
        let report = BatchDeleteReport::default();
        assert!(report.is_complete());
        assert!(report.into_result().is_ok());
    }
}
