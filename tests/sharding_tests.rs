use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{self, Instant};

use dynakit::engine::{BatchGetOutput, BatchWriteOutput, EngineOp, QueryRequest, TransactAction};
use dynakit::sharded_operations::ShardAddress;
use dynakit::{
    AccessError, AccessLayer, AccessLayerConfig, Condition, EngineError, Item, Key, Result,
    ShardedWriteRouter, StorageEngine, UpdateExpression,
};

fn config(shard_count: u32) -> AccessLayerConfig {
    AccessLayerConfig {
        shard_count,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_recorded_event_is_read_back_from_its_bucket() -> Result<()> {
    let (layer, _engine) = AccessLayer::in_memory(&config(5))?;

    let record = layer.events.record_event("DEMO_EVENT", "e1", "payload").await?;
    let address = ShardAddress::parse(&record.partition_key).expect("sharded partition key");
    assert!(address.shard < 5);
    assert_eq!(address.namespace, "EVENTS");

    let events = layer.events.query_by_bucket(address.date).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "DEMO_EVENT");
    assert_eq!(events[0].event_data, "payload");
    assert_eq!(events[0].record_id(), Some("e1"));

    Ok(())
}

#[tokio::test]
async fn test_writes_spread_over_all_shards() -> Result<()> {
    let (layer, engine) = AccessLayer::in_memory(&config(5))?;
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    for i in 0..200 {
        layer
            .events
            .record_event_at(at, "CLICK", &format!("e{i}"), "{}")
            .await?;
    }

    let partitions: HashSet<String> = engine
        .scan("Events", None)
        .await?
        .into_iter()
        .filter_map(|item| match item.get("pk") {
            Some(AttributeValue::S(pk)) => Some(pk.clone()),
            _ => None,
        })
        .collect();
    assert!(partitions.len() <= 5);
    // 200 uniform draws over 5 shards miss one with probability ~1e-19.
    assert_eq!(partitions.len(), 5);

    let events = layer.events.query_by_bucket(at.date_naive()).await?;
    assert_eq!(events.len(), 200);

    Ok(())
}

#[tokio::test]
async fn test_single_shard_uses_shard_zero() -> Result<()> {
    let (layer, _engine) = AccessLayer::in_memory(&config(1))?;
    let record = layer.events.record_event("LOGIN", "e1", "").await?;
    assert!(record.partition_key.ends_with("#SHARD0"));
    Ok(())
}

#[tokio::test]
async fn test_results_follow_shard_then_sort_order() -> Result<()> {
    let (layer, engine) = AccessLayer::in_memory(&config(3))?;
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

    // Interleave writes across shards, newest first.
    for (offset, shard) in [(5, 2), (4, 0), (3, 1), (2, 2), (1, 0), (0, 1)] {
        let at = start + Duration::seconds(offset);
        let record = layer
            .events
            .record_for(at, shard, "TICK", &format!("t{offset}"), "");
        engine.put_item("Events", record.to_item(), None).await?;
    }

    let events = layer.events.query_by_bucket(start.date_naive()).await?;
    let order: Vec<(u32, i64)> = events
        .iter()
        .map(|r| {
            let shard = ShardAddress::parse(&r.partition_key).unwrap().shard;
            (shard, r.timestamp_millis().unwrap())
        })
        .collect();

    let mut expected = order.clone();
    expected.sort();
    assert_eq!(order, expected);
    assert_eq!(order.len(), 6);

    Ok(())
}

#[tokio::test]
async fn test_filter_by_event_type() -> Result<()> {
    let (layer, _engine) = AccessLayer::in_memory(&config(4))?;
    let at = Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap();

    layer.events.record_event_at(at, "LOGIN", "a", "").await?;
    layer.events.record_event_at(at, "LOGOUT", "b", "").await?;
    layer.events.record_event_at(at, "LOGIN", "c", "").await?;

    let logins = layer
        .events
        .query_by_bucket_and_type(at.date_naive(), "LOGIN")
        .await?;
    assert_eq!(logins.len(), 2);
    assert!(logins.iter().all(|r| r.event_type == "LOGIN"));

    let none = layer
        .events
        .query_by_bucket_and_type(at.date_naive(), "PURCHASE")
        .await?;
    assert!(none.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_time_range_within_bucket() -> Result<()> {
    let (layer, _engine) = AccessLayer::in_memory(&config(3))?;
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

    for (i, offset) in [0, 60, 120, 180].into_iter().enumerate() {
        layer
            .events
            .record_event_at(t0 + Duration::seconds(offset), "PING", &format!("p{i}"), "")
            .await?;
    }

    let window = layer
        .events
        .query_by_bucket_between(t0.date_naive(), t0 + Duration::seconds(60), t0 + Duration::seconds(120))
        .await?;
    let mut ids: Vec<&str> = window.iter().filter_map(|r| r.record_id()).collect();
    ids.sort();
    assert_eq!(ids, ["p1", "p2"]);

    let inverted = layer
        .events
        .query_by_bucket_between(t0.date_naive(), t0 + Duration::seconds(1), t0)
        .await;
    assert!(matches!(inverted, Err(AccessError::Validation(_))));

    Ok(())
}

#[tokio::test]
async fn test_first_shard_failure_fails_the_read() -> Result<()> {
    let (layer, engine) = AccessLayer::in_memory(&config(5))?;
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    for i in 0..20 {
        layer
            .events
            .record_event_at(at, "CLICK", &format!("e{i}"), "")
            .await?;
    }

    let failing_shard = layer.events.partition_key(at.date_naive(), 3);
    engine.fail_on(
        EngineOp::Query,
        Some(AttributeValue::S(failing_shard)),
        EngineError::Throttled("shard 3 is hot".into()),
    );

    let err = layer
        .events
        .query_by_bucket(at.date_naive())
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Engine(EngineError::Throttled(_))));
    assert!(err.is_retryable());

    engine.clear_faults();
    assert_eq!(layer.events.query_by_bucket(at.date_naive()).await?.len(), 20);

    Ok(())
}

#[tokio::test]
async fn test_record_validation_and_ttl() -> Result<()> {
    let config = AccessLayerConfig {
        event_ttl_secs: Some(3600),
        ..Default::default()
    };
    let (layer, engine) = AccessLayer::in_memory(&config)?;
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let record = layer.events.record_event_at(at, "LOGIN", "e1", "").await?;
    assert_eq!(record.ttl, Some(at.timestamp() + 3600));

    assert!(matches!(
        layer.events.record_event_at(at, "", "e2", "").await,
        Err(AccessError::Validation(_))
    ));
    assert!(matches!(
        layer.events.record_event_at(at, "LOGIN", "", "").await,
        Err(AccessError::Validation(_))
    ));
    assert_eq!(engine.item_count("Events").await, 1);

    Ok(())
}

#[tokio::test]
async fn test_failed_write_is_reported() -> Result<()> {
    let (layer, engine) = AccessLayer::in_memory(&config(2))?;
    engine.fail_on(EngineOp::Put, None, EngineError::Connection("down".into()));

    let err = layer.events.record_event("LOGIN", "e1", "").await.unwrap_err();
    assert!(matches!(err, AccessError::Engine(EngineError::Connection(_))));
    assert_eq!(engine.item_count("Events").await, 0);

    Ok(())
}

/// Engine whose shard queries take a while, recording how many overlap.
#[derive(Default)]
struct SlowShards {
    failing_shard: Option<&'static str>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowShards {
    fn failing(shard_suffix: &'static str) -> Self {
        SlowShards {
            failing_shard: Some(shard_suffix),
            ..Default::default()
        }
    }
}

fn unused() -> EngineError {
    EngineError::Service("not used by shard queries".into())
}

#[async_trait]
impl StorageEngine for SlowShards {
    async fn put_item(&self, _: &str, _: Item, _: Option<Condition>) -> std::result::Result<(), EngineError> {
        Err(unused())
    }

    async fn get_item(&self, _: &str, _: &Key, _: bool) -> std::result::Result<Option<Item>, EngineError> {
        Err(unused())
    }

    async fn delete_item(&self, _: &str, _: &Key) -> std::result::Result<(), EngineError> {
        Err(unused())
    }

    async fn query(&self, _: &str, request: &QueryRequest) -> std::result::Result<Vec<Item>, EngineError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let fails = matches!(
            (&request.partition.value, self.failing_shard),
            (AttributeValue::S(pk), Some(suffix)) if pk.ends_with(suffix)
        );
        if fails {
            time::sleep(time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::Throttled("hot shard".into()));
        }
        time::sleep(time::Duration::from_millis(300)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn scan(&self, _: &str, _: Option<&Condition>) -> std::result::Result<Vec<Item>, EngineError> {
        Err(unused())
    }

    async fn batch_get(&self, _: &str, _: &[Key]) -> std::result::Result<BatchGetOutput, EngineError> {
        Err(unused())
    }

    async fn batch_delete(&self, _: &str, _: &[Key]) -> std::result::Result<BatchWriteOutput, EngineError> {
        Err(unused())
    }

    async fn transact_write(&self, _: Vec<TransactAction>) -> std::result::Result<(), EngineError> {
        Err(unused())
    }

    async fn update_item(
        &self,
        _: &str,
        _: &Key,
        _: &UpdateExpression,
        _: Option<Condition>,
    ) -> std::result::Result<(), EngineError> {
        Err(unused())
    }
}

fn slow_router(engine: &Arc<SlowShards>) -> Result<ShardedWriteRouter> {
    let config = AccessLayerConfig {
        shard_count: 8,
        fanout_workers: 3,
        ..Default::default()
    };
    ShardedWriteRouter::new(Arc::clone(engine) as Arc<dyn StorageEngine>, &config)
}

fn bucket() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_is_bounded_by_worker_count() -> Result<()> {
    let engine = Arc::new(SlowShards::default());
    let router = slow_router(&engine)?;

    let records = router.query_by_bucket(bucket()).await?;
    assert!(records.is_empty());
    assert_eq!(engine.completed.load(Ordering::SeqCst), 8);
    assert_eq!(engine.peak.load(Ordering::SeqCst), 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_first_failure_cancels_outstanding_shards() -> Result<()> {
    let engine = Arc::new(SlowShards::failing("#SHARD0"));
    let router = slow_router(&engine)?;

    let started = Instant::now();
    let err = router.query_by_bucket(bucket()).await.unwrap_err();
    assert!(matches!(err, AccessError::Engine(EngineError::Throttled(_))));
    assert!(started.elapsed() < time::Duration::from_millis(300));
    assert!(engine.peak.load(Ordering::SeqCst) <= 3);

    // Aborted siblings never finish, even once their latency has passed.
    time::sleep(time::Duration::from_secs(1)).await;
    assert_eq!(engine.completed.load(Ordering::SeqCst), 0);

    Ok(())
}
