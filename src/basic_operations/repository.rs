//! Existence-guarded create, consistent fetch and update against one table.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{Item, Key, KeySchema, QueryRequest, StorageEngine};
use crate::errors::{AccessError, EngineError, Result};
use crate::expressions::{AttributePath, Condition, SortKeyCondition, UpdateExpression};

/// Outcome of [`SingleItemRepository::update_matching`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMatchingReport {
    pub updated: Vec<Key>,
    /// Items that stopped matching the filter between the scan and the update.
    pub skipped: Vec<Key>,
    pub failed: Vec<(Key, EngineError)>,
}

/// Item-level access to one table.
#[derive(Clone)]
pub struct SingleItemRepository {
    engine: Arc<dyn StorageEngine>,
    table: String,
    schema: KeySchema,
    indexes: HashMap<String, KeySchema>,
}

impl SingleItemRepository {
    pub fn new(engine: Arc<dyn StorageEngine>, table: impl Into<String>, schema: KeySchema) -> Self {
        SingleItemRepository {
            engine,
            table: table.into(),
            schema,
            indexes: HashMap::new(),
        }
    }

    /// Make the secondary index `name` queryable through [`query_index`](Self::query_index).
    pub fn with_index(mut self, name: impl Into<String>, schema: KeySchema) -> Self {
        self.indexes.insert(name.into(), schema);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    fn key_of(&self, item: &Item) -> Result<Key> {
        let key = self.schema.key_of(item).ok_or_else(|| {
            AccessError::Validation(format!(
                "item is missing key attributes for table '{}'",
                self.table
            ))
        })?;
        key.validate().map_err(AccessError::Validation)?;
        Ok(key)
    }

    /// Store `item` only if no item with its key exists.
    ///
    /// A second call with the same key fails with `AlreadyExists` and leaves
    /// the stored item untouched.
    pub async fn create_once(&self, item: Item) -> Result<()> {
        let key = self.key_of(&item)?;
        let condition = Condition::attribute_not_exists(self.schema.partition_key.as_str());

        match self.engine.put_item(&self.table, item, Some(condition)).await {
            Ok(()) => {
                info!(table = %self.table, key = %key, "Created item");
                Ok(())
            }
            Err(EngineError::ConditionFailed) => {
                warn!(table = %self.table, key = %key, "Item already exists");
                Err(AccessError::AlreadyExists {
                    table: self.table.clone(),
                    key: key.to_string(),
                })
            }
            Err(err) => {
                warn!(table = %self.table, key = %key, error = %err, "Failed to create item");
                Err(err.into())
            }
        }
    }

    /// Strongly consistent read; `NotFound` when absent.
    pub async fn fetch_consistent(&self, key: &Key) -> Result<Item> {
        key.validate().map_err(AccessError::Validation)?;
        debug!(table = %self.table, key = %key, "Fetching item");

        self.engine
            .get_item(&self.table, key, true)
            .await
            .inspect_err(|err| warn!(table = %self.table, key = %key, error = %err, "Failed to fetch item"))?
            .ok_or_else(|| AccessError::NotFound {
                table: self.table.clone(),
                key: key.to_string(),
            })
    }

    /// Overwrite every non-key attribute present on `item` (last writer wins).
    ///
    /// Attributes absent from `item` are left as stored. An item carrying
    /// only key attributes is rejected.
    pub async fn update(&self, item: &Item) -> Result<()> {
        let key = self.key_of(item)?;
        let attributes: Item = item
            .iter()
            .filter(|(name, _)| !self.schema.is_key_attribute(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if attributes.is_empty() {
            return Err(AccessError::Validation(format!(
                "item {} has no attributes to update",
                key
            )));
        }

        let update = UpdateExpression::assign_all(&attributes);
        self.engine
            .update_item(&self.table, &key, &update, None)
            .await
            .inspect_err(|err| warn!(table = %self.table, key = %key, error = %err, "Failed to update item"))?;
        info!(table = %self.table, key = %key, attributes = attributes.len(), "Updated item");
        Ok(())
    }

    /// All items of one partition, in sort-key order.
    ///
    /// `sort` bounds the sort key, `filter` drops items after the key
    /// condition and `projection` limits the returned attributes.
    pub async fn query_partition(
        &self,
        partition_value: AttributeValue,
        sort: Option<SortKeyCondition>,
        filter: Option<Condition>,
        projection: Option<&[AttributePath]>,
    ) -> Result<Vec<Item>> {
        self.run_query(None, &self.schema, partition_value, sort, filter, projection)
            .await
    }

    /// Items of one partition of the secondary index `index_name`, in the
    /// index's sort-key order. Index reads are eventually consistent.
    pub async fn query_index(
        &self,
        index_name: &str,
        partition_value: AttributeValue,
        sort: Option<SortKeyCondition>,
        filter: Option<Condition>,
        projection: Option<&[AttributePath]>,
    ) -> Result<Vec<Item>> {
        let schema = self.indexes.get(index_name).ok_or_else(|| {
            AccessError::Validation(format!(
                "table '{}' has no index '{}'",
                self.table, index_name
            ))
        })?;
        self.run_query(Some(index_name), schema, partition_value, sort, filter, projection)
            .await
    }

    async fn run_query(
        &self,
        index_name: Option<&str>,
        schema: &KeySchema,
        partition_value: AttributeValue,
        sort: Option<SortKeyCondition>,
        filter: Option<Condition>,
        projection: Option<&[AttributePath]>,
    ) -> Result<Vec<Item>> {
        if let Some(sort) = &sort {
            let sort_name = match sort {
                SortKeyCondition::Between { name, .. } | SortKeyCondition::BeginsWith { name, .. } => name,
            };
            if schema.sort_key.as_deref() != Some(sort_name.as_str()) {
                return Err(AccessError::Validation(format!(
                    "'{}' is not the sort key of '{}'",
                    sort_name,
                    index_name.unwrap_or(self.table.as_str())
                )));
            }
        }
        if projection.is_some_and(|paths| paths.is_empty()) {
            return Err(AccessError::Validation("projection must name at least one attribute".into()));
        }
        Key::new(schema.partition_key.clone(), partition_value.clone())
            .validate()
            .map_err(AccessError::Validation)?;

        let mut request = QueryRequest::partition(schema.partition_key.clone(), partition_value);
        request.sort = sort;
        if let Some(filter) = filter {
            request = request.filter(filter);
        }
        if let Some(index_name) = index_name {
            request = request.on_index(index_name);
        }
        if let Some(paths) = projection {
            request = request.project(paths.iter().cloned());
        }

        let items = self
            .engine
            .query(&self.table, &request)
            .await
            .inspect_err(|err| warn!(table = %self.table, index = ?index_name, error = %err, "Query failed"))?;
        info!(table = %self.table, index = ?index_name, count = items.len(), "Queried partition");
        Ok(items)
    }

    /// Every item matching `filter` (full table scan).
    pub async fn scan_matching(&self, filter: &Condition) -> Result<Vec<Item>> {
        let items = self.engine.scan(&self.table, Some(filter)).await?;
        info!(table = %self.table, count = items.len(), "Found items matching filter");
        Ok(items)
    }

    /// Apply `update` to every item matching `filter`.
    ///
    /// Each update is conditioned on `filter`, so an item changed by someone
    /// else after the scan is skipped instead of overwritten. Per-item engine
    /// failures are collected and do not stop the remaining updates.
    pub async fn update_matching(
        &self,
        filter: &Condition,
        update: &UpdateExpression,
    ) -> Result<UpdateMatchingReport> {
        if update.is_empty() {
            return Err(AccessError::Validation("update has no clauses".into()));
        }
        let items = self.scan_matching(filter).await?;

        let mut report = UpdateMatchingReport::default();
        for key in items.iter().filter_map(|item| self.schema.key_of(item)) {
            match self
                .engine
                .update_item(&self.table, &key, update, Some(filter.clone()))
                .await
            {
                Ok(()) => report.updated.push(key),
                Err(EngineError::ConditionFailed) => {
                    debug!(table = %self.table, key = %key, "Item no longer matches filter");
                    report.skipped.push(key);
                }
                Err(err) => {
                    warn!(table = %self.table, key = %key, error = %err, "Failed to update matching item");
                    report.failed.push((key, err));
                }
            }
        }

        info!(
            table = %self.table,
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Updated matching items"
        );
        Ok(report)
    }
}
