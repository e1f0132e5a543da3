//! Batch get.

use tracing::{info, warn};

use super::{BATCH_GET_MAX_ITEMS, BatchChunker};
use crate::engine::{Item, Key};
use crate::errors::{AccessError, Result};

/// Items returned by one batch get, plus what was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetReport {
    /// Found items, in engine order (not request order).
    pub items: Vec<Item>,
    /// Number of trailing input keys dropped to fit the request limit.
    pub truncated: usize,
    /// Keys the engine did not process.
    pub unprocessed: Vec<Item>,
}

impl BatchChunker {
    /// Fetch up to `engine_max` keys in one request.
    ///
    /// Longer inputs are truncated to their first `engine_max` keys; the
    /// remainder is counted in [`BatchGetReport::truncated`], not fetched.
    pub async fn batch_get(&self, keys: &[Key], engine_max: usize) -> Result<BatchGetReport> {
        if engine_max == 0 || engine_max > BATCH_GET_MAX_ITEMS {
            return Err(AccessError::Validation(format!(
                "batch get limit must be between 1 and {} (got {})",
                BATCH_GET_MAX_ITEMS, engine_max
            )));
        }
        if keys.is_empty() {
            return Ok(BatchGetReport::default());
        }

        let truncated = keys.len().saturating_sub(engine_max);
        if truncated > 0 {
            info!(
                table = %self.table,
                requested = keys.len(),
                limit = engine_max,
                "Limited batch get input to the request limit"
            );
        }
        let requested = &keys[..keys.len() - truncated];
        requested
            .iter()
            .try_for_each(|key| key.validate())
            .map_err(AccessError::Validation)?;

        let output = self
            .engine
            .batch_get(&self.table, requested)
            .await
            .inspect_err(|err| warn!(table = %self.table, error = %err, "Batch get failed"))?;

        if !output.unprocessed.is_empty() {
            warn!(
                table = %self.table,
                unprocessed = output.unprocessed.len(),
                "Batch get left keys unprocessed"
            );
        }
        info!(
            table = %self.table,
            requested = requested.len(),
            found = output.items.len(),
            "Batch get complete"
        );

        Ok(BatchGetReport {
            items: output.items,
            truncated,
            unprocessed: output.unprocessed,
        })
    }
}
