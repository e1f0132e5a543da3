//! dynakit - partitioned key-value access layer for DynamoDB.
//!
//! Three access patterns on top of a [`StorageEngine`]:
//! - write sharding of time-bucketed events ([`ShardedWriteRouter`])
//! - authorization-gated atomic mutations ([`TransactionalMutationCoordinator`])
//! - chunked bulk deletes and reads ([`BatchChunker`])
//!
//! plus existence-guarded single-item access ([`SingleItemRepository`]).
//!
//! ```no_run
//! # async fn demo() -> dynakit::Result<()> {
//! use std::sync::Arc;
//! use dynakit::{AccessLayer, AccessLayerConfig, ClientConfig, DynamoEngine};
//!
//! dynakit::logging::init_tracing();
//! let engine = DynamoEngine::from_config(&ClientConfig::from_env()).await;
//! let layer = AccessLayer::new(Arc::new(engine), &AccessLayerConfig::from_env()?)?;
//! layer.events.record_event("LOGIN", "evt-1", "{}").await?;
//! # Ok(())
//! # }
//! ```

pub mod basic_operations;
pub mod batch_operations;
pub mod client;
pub mod config;
pub mod conversions;
pub mod engine;
pub mod errors;
pub mod expressions;
pub mod logging;
pub mod models;
pub mod sharded_operations;
pub mod transaction_operations;

use std::sync::Arc;

pub use basic_operations::{SingleItemRepository, UpdateMatchingReport};
pub use batch_operations::{BatchChunker, BatchDeleteReport, BatchGetReport, ChunkOutcome, ChunkStatus};
pub use client::{DynamoEngine, build_client};
pub use config::{AccessLayerConfig, ClientConfig};
pub use engine::{Item, Key, KeySchema, MemoryEngine, StorageEngine};
pub use errors::{AccessError, EngineError, Result};
pub use expressions::{AttributePath, Condition, SortKeyCondition, UpdateExpression};
pub use models::{AuthorizationRecord, ShardedRecord, SubscriptionTier, TargetRecord};
pub use sharded_operations::ShardedWriteRouter;
pub use transaction_operations::TransactionalMutationCoordinator;

/// All components wired to one engine and configuration.
#[derive(Clone)]
pub struct AccessLayer {
    pub events: ShardedWriteRouter,
    pub tenants: TransactionalMutationCoordinator,
    /// Item access to the tenants table.
    pub tenant_records: SingleItemRepository,
    /// Bulk operations on the events table.
    pub event_batches: BatchChunker,
    /// Bulk operations on the tenants table.
    pub tenant_batches: BatchChunker,
}

impl AccessLayer {
    pub fn new(engine: Arc<dyn StorageEngine>, config: &AccessLayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(AccessLayer {
            events: ShardedWriteRouter::new(Arc::clone(&engine), config)?,
            tenants: TransactionalMutationCoordinator::new(
                Arc::clone(&engine),
                config.tenants_table.clone(),
            ),
            tenant_records: SingleItemRepository::new(
                Arc::clone(&engine),
                config.tenants_table.clone(),
                models::tenants_schema(),
            )
            .with_index(models::STATUS_INDEX, models::status_index_schema()),
            event_batches: BatchChunker::new(
                Arc::clone(&engine),
                config.events_table.clone(),
                config.chunk_concurrency,
            ),
            tenant_batches: BatchChunker::new(
                engine,
                config.tenants_table.clone(),
                config.chunk_concurrency,
            ),
        })
    }

    /// In-process engine with both tables registered, for tests and local runs.
    pub fn in_memory(config: &AccessLayerConfig) -> Result<(Self, Arc<MemoryEngine>)> {
        let engine = Arc::new(
            MemoryEngine::new()
                .with_table(config.events_table.clone(), models::events_schema())
                .with_table(config.tenants_table.clone(), models::tenants_schema())
                .with_index(
                    &config.tenants_table,
                    models::STATUS_INDEX,
                    models::status_index_schema(),
                ),
        );
        let layer = AccessLayer::new(Arc::clone(&engine) as Arc<dyn StorageEngine>, config)?;
        Ok((layer, engine))
    }
}
