//! The storage engine contract consumed by every access-layer component.
//!
//! Components hold an `Arc<dyn StorageEngine>` and never talk to the SDK
//! directly. Two engines ship with the crate:
//! - [`DynamoEngine`](crate::client::DynamoEngine) - AWS DynamoDB
//! - [`MemoryEngine`] - in-process tables with the same semantics and limits

mod memory;

pub use memory::{EngineOp, MemoryEngine};

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::fmt;

use crate::errors::EngineError;
use crate::expressions::{AttributePath, Condition, SortKeyCondition, UpdateExpression};

/// A stored item: attribute name to value.
pub type Item = HashMap<String, AttributeValue>;

/// Primary key layout of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl KeySchema {
    pub fn simple(partition_key: impl Into<String>) -> Self {
        KeySchema {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    pub fn composite(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        KeySchema {
            partition_key: partition_key.into(),
            sort_key: Some(sort_key.into()),
        }
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_key || self.sort_key.as_deref() == Some(name)
    }

    /// Extract the primary key of `item`, or `None` if a key attribute is missing.
    pub fn key_of(&self, item: &Item) -> Option<Key> {
        let partition = item.get(&self.partition_key)?;
        let key = Key::new(self.partition_key.clone(), partition.clone());
        match &self.sort_key {
            Some(sort_name) => {
                let sort = item.get(sort_name)?;
                Some(key.with_sort(sort_name.clone(), sort.clone()))
            }
            None => Some(key),
        }
    }
}

/// One named key attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyAttribute {
    pub name: String,
    pub value: AttributeValue,
}

/// Primary key of one item: a partition attribute and an optional sort attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    partition: KeyAttribute,
    sort: Option<KeyAttribute>,
}

impl Key {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Key {
            partition: KeyAttribute {
                name: name.into(),
                value,
            },
            sort: None,
        }
    }

    /// Key with a string partition value.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Key::new(name, AttributeValue::S(value.into()))
    }

    pub fn with_sort(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.sort = Some(KeyAttribute {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_string_sort(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_sort(name, AttributeValue::S(value.into()))
    }

    pub fn partition(&self) -> &KeyAttribute {
        &self.partition
    }

    pub fn sort(&self) -> Option<&KeyAttribute> {
        self.sort.as_ref()
    }

    /// The key as an item containing only the key attributes.
    pub fn to_item(&self) -> Item {
        let mut item = HashMap::with_capacity(2);
        item.insert(self.partition.name.clone(), self.partition.value.clone());
        if let Some(sort) = &self.sort {
            item.insert(sort.name.clone(), sort.value.clone());
        }
        item
    }

    /// Reject keys DynamoDB would refuse (empty string or binary key values).
    pub fn validate(&self) -> Result<(), String> {
        std::iter::once(&self.partition)
            .chain(self.sort.as_ref())
            .try_for_each(|attr| match &attr.value {
                AttributeValue::S(s) if s.is_empty() => {
                    Err(format!("key attribute '{}' must not be empty", attr.name))
                }
                AttributeValue::B(b) if b.as_ref().is_empty() => {
                    Err(format!("key attribute '{}' must not be empty", attr.name))
                }
                AttributeValue::S(_) | AttributeValue::N(_) | AttributeValue::B(_) => Ok(()),
                _ => Err(format!(
                    "key attribute '{}' must be a string, number or binary",
                    attr.name
                )),
            })
    }
}

fn display_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(s) => s.clone(),
        AttributeValue::N(n) => n.clone(),
        AttributeValue::B(_) => "<binary>".to_string(),
        other => format!("{:?}", other),
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            self.partition.name,
            display_value(&self.partition.value)
        )?;
        if let Some(sort) = &self.sort {
            write!(f, ",{}={}", sort.name, display_value(&sort.value))?;
        }
        Ok(())
    }
}

/// A key-condition query against one partition of a table or secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub partition: KeyAttribute,
    pub sort: Option<SortKeyCondition>,
    /// Applied to each matching item before projection.
    pub filter: Option<Condition>,
    /// Secondary index to query instead of the base table.
    pub index_name: Option<String>,
    /// Attributes to return; every attribute when `None`.
    pub projection: Option<Vec<AttributePath>>,
    pub consistent_read: bool,
}

impl QueryRequest {
    pub fn partition(name: impl Into<String>, value: AttributeValue) -> Self {
        QueryRequest {
            partition: KeyAttribute {
                name: name.into(),
                value,
            },
            sort: None,
            filter: None,
            index_name: None,
            projection: None,
            consistent_read: false,
        }
    }

    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn project<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<AttributePath>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Result of one batch get request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    /// Keys the engine did not process in this request.
    pub unprocessed: Vec<Item>,
}

/// Result of one batch delete request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutput {
    /// Keys the engine did not process in this request.
    pub unprocessed: Vec<Item>,
}

/// One action of an atomic multi-item write.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactAction {
    ConditionCheck {
        table: String,
        key: Key,
        condition: Condition,
    },
    Put {
        table: String,
        item: Item,
        condition: Option<Condition>,
    },
    Delete {
        table: String,
        key: Key,
        condition: Option<Condition>,
    },
    Update {
        table: String,
        key: Key,
        update: UpdateExpression,
        condition: Option<Condition>,
    },
}

impl TransactAction {
    pub fn table(&self) -> &str {
        match self {
            TransactAction::ConditionCheck { table, .. }
            | TransactAction::Put { table, .. }
            | TransactAction::Delete { table, .. }
            | TransactAction::Update { table, .. } => table,
        }
    }
}

/// Abstract partitioned key-value store.
///
/// Every call is one round trip (paginated reads follow continuation tokens
/// until exhausted). Implementations never retry; failures are returned as-is.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> Result<(), EngineError>;

    async fn get_item(
        &self,
        table: &str,
        key: &Key,
        consistent_read: bool,
    ) -> Result<Option<Item>, EngineError>;

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), EngineError>;

    async fn query(&self, table: &str, request: &QueryRequest) -> Result<Vec<Item>, EngineError>;

    async fn scan(&self, table: &str, filter: Option<&Condition>) -> Result<Vec<Item>, EngineError>;

    /// At most [`BATCH_GET_MAX_ITEMS`](crate::batch_operations::BATCH_GET_MAX_ITEMS) keys.
    async fn batch_get(&self, table: &str, keys: &[Key]) -> Result<BatchGetOutput, EngineError>;

    /// At most [`BATCH_WRITE_MAX_ITEMS`](crate::batch_operations::BATCH_WRITE_MAX_ITEMS) keys.
    async fn batch_delete(&self, table: &str, keys: &[Key])
    -> Result<BatchWriteOutput, EngineError>;

    /// At most [`TRANSACTION_MAX_ITEMS`](crate::transaction_operations::TRANSACTION_MAX_ITEMS)
    /// actions, applied all-or-nothing.
    async fn transact_write(&self, actions: Vec<TransactAction>) -> Result<(), EngineError>;

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        update: &UpdateExpression,
        condition: Option<Condition>,
    ) -> Result<(), EngineError>;
}
