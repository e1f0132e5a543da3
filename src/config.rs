//! Configuration for the DynamoDB client and the access layer.
//!
//! Both structs deserialize from JSON (missing fields take their defaults)
//! and can be populated from environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{AccessError, Result};

/// Connection settings for [`build_client`](crate::client::build_client).
///
/// Credential priority: hardcoded keys, then `profile`, then the default
/// AWS chain (environment, instance profile, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub profile: Option<String>,
    /// Custom endpoint for local testing (DynamoDB Local, localstack).
    pub endpoint_url: Option<String>,
}

impl ClientConfig {
    /// Read `AWS_REGION` (or `AWS_DEFAULT_REGION`), `AWS_PROFILE` and
    /// `DYNAKIT_ENDPOINT_URL`. Keys are left to the default credential chain.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        ClientConfig {
            region: lookup("AWS_REGION").or_else(|| lookup("AWS_DEFAULT_REGION")),
            profile: lookup("AWS_PROFILE"),
            endpoint_url: lookup("DYNAKIT_ENDPOINT_URL"),
            ..Default::default()
        }
    }
}

/// Tables, sharding and concurrency settings for [`AccessLayer`](crate::AccessLayer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLayerConfig {
    /// Table holding sharded event records (composite `pk`/`sk` key).
    pub events_table: String,
    /// Table holding authorization and target records (simple `pk` key).
    pub tenants_table: String,
    /// First segment of every sharded partition key.
    pub event_namespace: String,
    pub shard_count: u32,
    /// Maximum in-flight shard queries during fan-out reads.
    pub fanout_workers: usize,
    /// Maximum in-flight batch chunks; 1 runs chunks sequentially.
    pub chunk_concurrency: usize,
    /// When set, event records get a `ttl` this many seconds after the write.
    pub event_ttl_secs: Option<u64>,
}

impl Default for AccessLayerConfig {
    fn default() -> Self {
        AccessLayerConfig {
            events_table: "Events".to_string(),
            tenants_table: "SaasApp".to_string(),
            event_namespace: "EVENTS".to_string(),
            shard_count: 5,
            fanout_workers: 4,
            chunk_concurrency: 1,
            event_ttl_secs: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: String) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        AccessError::Validation(format!("{} has an invalid value: '{}'", name, raw))
    })
}

impl AccessLayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AccessLayerConfig = serde_json::from_str(json)
            .map_err(|e| AccessError::Validation(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DYNAKIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AccessLayerConfig::default();
        if let Some(table) = lookup("DYNAKIT_EVENTS_TABLE") {
            config.events_table = table;
        }
        if let Some(table) = lookup("DYNAKIT_TENANTS_TABLE") {
            config.tenants_table = table;
        }
        if let Some(namespace) = lookup("DYNAKIT_EVENT_NAMESPACE") {
            config.event_namespace = namespace;
        }
        if let Some(raw) = lookup("DYNAKIT_SHARD_COUNT") {
            config.shard_count = parse_var("DYNAKIT_SHARD_COUNT", raw)?;
        }
        if let Some(raw) = lookup("DYNAKIT_FANOUT_WORKERS") {
            config.fanout_workers = parse_var("DYNAKIT_FANOUT_WORKERS", raw)?;
        }
        if let Some(raw) = lookup("DYNAKIT_CHUNK_CONCURRENCY") {
            config.chunk_concurrency = parse_var("DYNAKIT_CHUNK_CONCURRENCY", raw)?;
        }
        if let Some(raw) = lookup("DYNAKIT_EVENT_TTL_SECS") {
            config.event_ttl_secs = Some(parse_var("DYNAKIT_EVENT_TTL_SECS", raw)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.events_table.is_empty() || self.tenants_table.is_empty() {
            return Err(AccessError::Validation(
                "table names must not be empty".into(),
            ));
        }
        if self.event_namespace.is_empty() || self.event_namespace.contains('#') {
            return Err(AccessError::Validation(format!(
                "event namespace '{}' must be non-empty and must not contain '#'",
                self.event_namespace
            )));
        }
        if self.shard_count == 0 {
            return Err(AccessError::Validation("shard_count must be at least 1".into()));
        }
        if self.fanout_workers == 0 {
            return Err(AccessError::Validation(
                "fanout_workers must be at least 1".into(),
            ));
        }
        if self.chunk_concurrency == 0 {
            return Err(AccessError::Validation(
                "chunk_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
