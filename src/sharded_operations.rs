//! Write-sharded event storage.
//!
//! Each write lands on a uniformly random shard of its daily bucket, so one
//! day's traffic spreads over `shard_count` partitions instead of one hot
//! partition. Reading a bucket fans out one query per shard and joins them.
//!
//! Partition keys look like `EVENTS#2024-03-01#SHARD3`; sort keys like
//! `1709251200000#<record-id>`, which keeps records chronological within a
//! shard. There is no ordering across shards.

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::AccessLayerConfig;
use crate::conversions::string_value;
use crate::engine::{Item, QueryRequest, StorageEngine};
use crate::errors::{AccessError, Result};
use crate::expressions::SortKeyCondition;
use crate::models::{PARTITION_KEY, SORT_KEY, ShardedRecord};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Partition key of `shard` in the bucket for `date`.
pub fn shard_partition_key(namespace: &str, date: NaiveDate, shard: u32) -> String {
    format!("{}#{}#SHARD{}", namespace, date.format(DATE_FORMAT), shard)
}

/// Sort key for a record written at `timestamp_millis`.
pub fn event_sort_key(timestamp_millis: i64, record_id: &str) -> String {
    format!("{}#{}", timestamp_millis, record_id)
}

/// Decoded form of a sharded partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAddress {
    pub namespace: String,
    pub date: NaiveDate,
    pub shard: u32,
}

impl ShardAddress {
    /// Parse `<namespace>#<YYYY-MM-DD>#SHARD<k>`.
    pub fn parse(partition_key: &str) -> Option<Self> {
        let mut parts = partition_key.split('#');
        let namespace = parts.next()?;
        let date = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
        let shard = parts.next()?.strip_prefix("SHARD")?.parse().ok()?;
        if parts.next().is_some() || namespace.is_empty() {
            return None;
        }
        Some(ShardAddress {
            namespace: namespace.to_string(),
            date,
            shard,
        })
    }
}

/// Routes event writes to random shards and reads whole buckets back.
#[derive(Clone)]
pub struct ShardedWriteRouter {
    engine: Arc<dyn StorageEngine>,
    table: String,
    namespace: String,
    shard_count: u32,
    fanout_workers: usize,
    ttl_secs: Option<u64>,
}

impl ShardedWriteRouter {
    pub fn new(engine: Arc<dyn StorageEngine>, config: &AccessLayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(ShardedWriteRouter {
            engine,
            table: config.events_table.clone(),
            namespace: config.event_namespace.clone(),
            shard_count: config.shard_count,
            fanout_workers: config.fanout_workers,
            ttl_secs: config.event_ttl_secs,
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn partition_key(&self, date: NaiveDate, shard: u32) -> String {
        shard_partition_key(&self.namespace, date, shard)
    }

    /// Record an event in today's (UTC) bucket on a random shard.
    pub async fn record_event(
        &self,
        event_type: &str,
        record_id: &str,
        payload: &str,
    ) -> Result<ShardedRecord> {
        self.record_event_at(Utc::now(), event_type, record_id, payload)
            .await
    }

    /// Record an event as if written at `at`.
    pub async fn record_event_at(
        &self,
        at: DateTime<Utc>,
        event_type: &str,
        record_id: &str,
        payload: &str,
    ) -> Result<ShardedRecord> {
        if event_type.is_empty() {
            return Err(AccessError::Validation("event type must not be empty".into()));
        }
        if record_id.is_empty() {
            return Err(AccessError::Validation("record id must not be empty".into()));
        }

        let shard = rand::rng().random_range(0..self.shard_count);
        let record = self.record_for(at, shard, event_type, record_id, payload);

        self.engine
            .put_item(&self.table, record.to_item(), None)
            .await
            .inspect_err(|err| {
                error!(
                    table = %self.table,
                    pk = %record.partition_key,
                    error = %err,
                    "Failed to record event"
                )
            })?;

        debug!(table = %self.table, pk = %record.partition_key, sk = %record.sort_key, "Recorded event");
        Ok(record)
    }

    /// The record a write at `at` to `shard` would store.
    pub fn record_for(
        &self,
        at: DateTime<Utc>,
        shard: u32,
        event_type: &str,
        record_id: &str,
        payload: &str,
    ) -> ShardedRecord {
        let ttl = self
            .ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| at.timestamp().saturating_add(secs));
        ShardedRecord {
            partition_key: self.partition_key(at.date_naive(), shard),
            sort_key: event_sort_key(at.timestamp_millis(), record_id),
            event_type: event_type.to_string(),
            event_data: payload.to_string(),
            ttl,
        }
    }

    /// Every record of the bucket for `date`, shard by shard.
    ///
    /// Results are concatenated in shard order; within a shard they keep
    /// sort-key order. The first shard failure aborts the whole read.
    pub async fn query_by_bucket(&self, date: NaiveDate) -> Result<Vec<ShardedRecord>> {
        self.fan_out(date, None).await
    }

    /// [`query_by_bucket`](Self::query_by_bucket) keeping only `event_type`.
    pub async fn query_by_bucket_and_type(
        &self,
        date: NaiveDate,
        event_type: &str,
    ) -> Result<Vec<ShardedRecord>> {
        Ok(self
            .query_by_bucket(date)
            .await?
            .into_iter()
            .filter(|record| record.event_type == event_type)
            .collect())
    }

    /// Records of the bucket for `date` written within `[from, to]`.
    pub async fn query_by_bucket_between(
        &self,
        date: NaiveDate,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ShardedRecord>> {
        if from > to {
            return Err(AccessError::Validation(format!(
                "range start {} is after range end {}",
                from, to
            )));
        }
        // `$` sorts directly after `#`, so the upper bound covers every
        // record id written in the last millisecond.
        let sort = SortKeyCondition::Between {
            name: SORT_KEY.to_string(),
            low: string_value(from.timestamp_millis().to_string()),
            high: string_value(format!("{}$", to.timestamp_millis())),
        };
        self.fan_out(date, Some(sort)).await
    }

    async fn fan_out(
        &self,
        date: NaiveDate,
        sort: Option<SortKeyCondition>,
    ) -> Result<Vec<ShardedRecord>> {
        let permits = Arc::new(Semaphore::new(self.fanout_workers));
        let mut tasks = JoinSet::new();

        for shard in 0..self.shard_count {
            let engine = Arc::clone(&self.engine);
            let permits = Arc::clone(&permits);
            let table = self.table.clone();
            let mut request = QueryRequest::partition(
                PARTITION_KEY,
                AttributeValue::S(self.partition_key(date, shard)),
            );
            request.sort = sort.clone();

            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| AccessError::Internal(format!("fan-out semaphore closed: {}", e)))?;
                let items = engine.query(&table, &request).await.inspect_err(|err| {
                    error!(table = %table, shard, error = %err, "Shard query failed")
                })?;
                Ok::<_, AccessError>((shard, items))
            });
        }

        let mut per_shard: Vec<Vec<Item>> = vec![Vec::new(); self.shard_count as usize];
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| AccessError::Internal(format!("shard query task failed: {}", e)))
                .and_then(|result| result);
            match outcome {
                Ok((shard, items)) => per_shard[shard as usize] = items,
                Err(err) => {
                    // Remaining shard queries are cancelled; partial results are dropped.
                    tasks.abort_all();
                    return Err(err);
                }
            }
        }

        let records = per_shard
            .into_iter()
            .flatten()
            .map(|item| ShardedRecord::try_from_item(&item))
            .collect::<Result<Vec<_>>>()?;

        info!(
            table = %self.table,
            date = %date.format(DATE_FORMAT),
            shards = self.shard_count,
            count = records.len(),
            "Fetched bucket across shards"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn partition_key_round_trips_for_every_shard() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for shard_count in [1u32, 2, 5, 16] {
            for shard in 0..shard_count {
                let pk = shard_partition_key("EVENTS", date, shard);
                let address = ShardAddress::parse(&pk).unwrap();
                assert_eq!(address.namespace, "EVENTS");
                assert_eq!(address.date, date);
                assert_eq!(address.shard, shard);
                assert!(address.shard < shard_count);
            }
        }
    }

    #[test]
    fn partition_key_format() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(shard_partition_key("EVENTS", date, 3), "EVENTS#2024-01-09#SHARD3");
    }

    #[test]
    fn malformed_partition_keys_do_not_parse() {
        for pk in [
            "EVENTS#2024-01-09",
            "EVENTS#2024-13-01#SHARD1",
            "EVENTS#2024-01-09#SHARDx",
            "EVENTS#2024-01-09#SHARD1#extra",
            "#2024-01-09#SHARD1",
        ] {
            assert!(ShardAddress::parse(pk).is_none(), "{pk}");
        }
    }

    #[test]
    fn sort_key_is_millis_then_id() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(event_sort_key(at.timestamp_millis(), "e1"), "1709251200000#e1");
    }
}
