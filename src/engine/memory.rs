//! In-process storage engine.
//!
//! Tables live behind one async `RwLock` and keep their items ordered by
//! `(partition, sort)` so queries return items in sort-key order. Conditions
//! and update expressions are evaluated with DynamoDB semantics, and the
//! per-request limits are enforced, so code exercised against this engine
//! behaves the same against DynamoDB.
//!
//! Faults can be injected per operation (optionally per partition value) to
//! drive failure paths in tests.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BatchGetOutput, BatchWriteOutput, Item, Key, KeySchema, QueryRequest, StorageEngine, TransactAction};
use crate::batch_operations::{BATCH_GET_MAX_ITEMS, BATCH_WRITE_MAX_ITEMS};
use crate::errors::EngineError;
use crate::expressions::{AttributePath, Condition, UpdateAction, UpdateExpression};
use crate::transaction_operations::TRANSACTION_MAX_ITEMS;

/// Engine operations, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Put,
    Get,
    Delete,
    Query,
    Scan,
    BatchGet,
    BatchDelete,
    TransactWrite,
    UpdateItem,
}

#[derive(Debug, Clone)]
struct FaultRule {
    op: EngineOp,
    partition: Option<AttributeValue>,
    error: EngineError,
}

/// Orderable form of a key attribute value.
#[derive(Debug, Clone)]
enum KeyPart {
    S(String),
    N(String),
    B(Vec<u8>),
}

impl KeyPart {
    fn from_value(value: &AttributeValue) -> Result<Self, EngineError> {
        match value {
            AttributeValue::S(s) => Ok(KeyPart::S(s.clone())),
            AttributeValue::N(n) => Ok(KeyPart::N(n.clone())),
            AttributeValue::B(b) => Ok(KeyPart::B(b.as_ref().to_vec())),
            _ => Err(EngineError::Validation(
                "Key attributes must be of type string, number or binary".into(),
            )),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            KeyPart::S(_) => 0,
            KeyPart::N(_) => 1,
            KeyPart::B(_) => 2,
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::S(a), KeyPart::S(b)) => a.cmp(b),
            (KeyPart::N(a), KeyPart::N(b)) => compare_numbers(a, b),
            (KeyPart::B(a), KeyPart::B(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

type StoredKey = (KeyPart, Option<KeyPart>);

fn compare_numbers(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}

#[derive(Debug)]
struct Table {
    schema: KeySchema,
    indexes: HashMap<String, KeySchema>,
    items: BTreeMap<StoredKey, Item>,
}

impl Table {
    fn stored_key(&self, key: &Key) -> Result<StoredKey, EngineError> {
        let mismatch = || {
            EngineError::Validation("The provided key element does not match the schema".into())
        };
        if key.partition().name != self.schema.partition_key {
            return Err(mismatch());
        }
        let sort = match (&self.schema.sort_key, key.sort()) {
            (Some(name), Some(sort)) if *name == sort.name => Some(KeyPart::from_value(&sort.value)?),
            (None, None) => None,
            _ => return Err(mismatch()),
        };
        Ok((KeyPart::from_value(&key.partition().value)?, sort))
    }

    fn key_of(&self, item: &Item) -> Result<Key, EngineError> {
        self.schema.key_of(item).ok_or_else(|| {
            EngineError::Validation(
                "One or more parameter values were invalid: Missing the key attributes in the item"
                    .into(),
            )
        })
    }
}

/// In-process [`StorageEngine`].
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<String, Table>>,
    faults: Mutex<Vec<FaultRule>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table while building the engine.
    pub fn with_table(mut self, name: impl Into<String>, schema: KeySchema) -> Self {
        self.tables.get_mut().insert(
            name.into(),
            Table {
                schema,
                indexes: HashMap::new(),
                items: BTreeMap::new(),
            },
        );
        self
    }

    /// Register a secondary index on a table added with [`with_table`](Self::with_table).
    ///
    /// Items lacking the index key attributes are left out of the index.
    pub fn with_index(mut self, table: &str, index: impl Into<String>, schema: KeySchema) -> Self {
        if let Some(table_data) = self.tables.get_mut().get_mut(table) {
            table_data.indexes.insert(index.into(), schema);
        }
        self
    }

    pub async fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.items.len())
            .unwrap_or(0)
    }

    /// Fail every future `op` touching `partition` (or any partition when `None`).
    pub fn fail_on(&self, op: EngineOp, partition: Option<AttributeValue>, error: EngineError) {
        self.faults_guard().push(FaultRule {
            op,
            partition,
            error,
        });
    }

    pub fn clear_faults(&self) {
        self.faults_guard().clear();
    }

    fn faults_guard(&self) -> std::sync::MutexGuard<'_, Vec<FaultRule>> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_fault<'a, I>(&self, op: EngineOp, partitions: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = &'a AttributeValue>,
    {
        let faults = self.faults_guard();
        if faults.is_empty() {
            return Ok(());
        }
        let partitions: Vec<&AttributeValue> = partitions.into_iter().collect();
        let hit = faults.iter().find(|rule| {
            rule.op == op
                && rule
                    .partition
                    .as_ref()
                    .is_none_or(|p| partitions.contains(&p))
        });
        match hit {
            Some(rule) => {
                debug!(?op, error = %rule.error, "Injected engine fault");
                Err(rule.error.clone())
            }
            None => Ok(()),
        }
    }
}

fn table_ref<'a>(tables: &'a HashMap<String, Table>, name: &str) -> Result<&'a Table, EngineError> {
    tables
        .get(name)
        .ok_or_else(|| EngineError::ResourceNotFound(format!("Table '{}' not found", name)))
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, Table>,
    name: &str,
) -> Result<&'a mut Table, EngineError> {
    tables
        .get_mut(name)
        .ok_or_else(|| EngineError::ResourceNotFound(format!("Table '{}' not found", name)))
}

fn ensure_distinct<T: PartialEq>(keys: &[T]) -> Result<(), EngineError> {
    let duplicated = keys
        .iter()
        .enumerate()
        .any(|(i, key)| keys[i + 1..].contains(key));
    if duplicated {
        return Err(EngineError::Validation(
            "Provided list of item keys contains duplicates".into(),
        ));
    }
    Ok(())
}

// ========== EXPRESSION EVALUATION ==========

fn resolve<'a>(item: &'a Item, path: &AttributePath) -> Option<&'a AttributeValue> {
    let (first, rest) = path.segments().split_first()?;
    rest.iter().try_fold(item.get(first)?, |value, segment| match value {
        AttributeValue::M(map) => map.get(segment),
        _ => None,
    })
}

/// Key of `item` under `schema`; `None` for items the schema does not index.
fn index_key(schema: &KeySchema, item: &Item) -> Option<StoredKey> {
    let key = schema.key_of(item)?;
    let partition = KeyPart::from_value(&key.partition().value).ok()?;
    let sort = match key.sort() {
        Some(sort) => Some(KeyPart::from_value(&sort.value).ok()?),
        None => None,
    };
    Some((partition, sort))
}

fn project(item: &Item, paths: &[AttributePath]) -> Item {
    let mut projected = Item::new();
    for path in paths {
        if let Some(value) = resolve(item, path) {
            insert_nested(&mut projected, path.segments(), value.clone());
        }
    }
    projected
}

fn insert_nested(target: &mut Item, segments: &[String], value: AttributeValue) {
    match segments {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let entry = target
                .entry(first.clone())
                .or_insert_with(|| AttributeValue::M(HashMap::new()));
            if let AttributeValue::M(map) = entry {
                insert_nested(map, rest, value);
            }
        }
    }
}

fn compare_values(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        (AttributeValue::N(x), AttributeValue::N(y)) => Some(compare_numbers(x, y)),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.as_ref().cmp(y.as_ref())),
        _ => None,
    }
}

fn evaluate(condition: &Condition, item: Option<&Item>) -> bool {
    let lookup = |path: &AttributePath| item.and_then(|i| resolve(i, path));
    match condition {
        Condition::AttributeExists(path) => lookup(path).is_some(),
        Condition::AttributeNotExists(path) => lookup(path).is_none(),
        Condition::Equals(path, expected) => lookup(path)
            .is_some_and(|actual| compare_values(actual, expected) == Some(Ordering::Equal) || actual == expected),
        Condition::Contains(path, needle) => match (lookup(path), needle) {
            (Some(AttributeValue::Ss(set)), AttributeValue::S(s)) => set.contains(s),
            (Some(AttributeValue::S(haystack)), AttributeValue::S(s)) => haystack.contains(s.as_str()),
            _ => false,
        },
        Condition::BeginsWith(path, prefix) => {
            matches!(lookup(path), Some(AttributeValue::S(s)) if s.starts_with(prefix.as_str()))
        }
        Condition::Between(path, low, high) => lookup(path).is_some_and(|actual| {
            matches!(
                compare_values(actual, low),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                compare_values(actual, high),
                Some(Ordering::Less | Ordering::Equal)
            )
        }),
        Condition::And(parts) => parts.iter().all(|part| evaluate(part, item)),
    }
}

fn invalid_path() -> EngineError {
    EngineError::Validation(
        "The document path provided in the update expression is invalid for update".into(),
    )
}

fn operand_type_error() -> EngineError {
    EngineError::Validation(
        "An operand in the update expression has an incorrect data type".into(),
    )
}

fn parent_map_mut<'a>(item: &'a mut Item, parents: &[String]) -> Result<&'a mut Item, EngineError> {
    let mut current = item;
    for segment in parents {
        current = match current.get_mut(segment) {
            Some(AttributeValue::M(map)) => map,
            _ => return Err(invalid_path()),
        };
    }
    Ok(current)
}

fn set_path(item: &mut Item, path: &AttributePath, value: AttributeValue) -> Result<(), EngineError> {
    let (last, parents) = path.segments().split_last().ok_or_else(invalid_path)?;
    parent_map_mut(item, parents)?.insert(last.clone(), value);
    Ok(())
}

fn remove_path(item: &mut Item, path: &AttributePath) {
    if let Some((last, parents)) = path.segments().split_last()
        && let Ok(parent) = parent_map_mut(item, parents)
    {
        parent.remove(last);
    }
}

fn union(current: &[String], added: &[String]) -> Vec<String> {
    let mut merged = current.to_vec();
    merged.extend(added.iter().filter(|v| !current.contains(v)).cloned());
    merged
}

/// Largest magnitude a stored number may have (38 significant digits).
const NUMBER_MAX_DIGITS: usize = 38;

fn number_overflow() -> EngineError {
    EngineError::Validation(
        "Number overflow. Attempting to store a number with magnitude larger than supported range"
            .into(),
    )
}

fn add_numbers(a: &str, b: &str) -> Result<String, EngineError> {
    if let (Ok(x), Ok(y)) = (a.parse::<i128>(), b.parse::<i128>()) {
        let sum = x.checked_add(y).ok_or_else(number_overflow)?;
        if sum.unsigned_abs().to_string().len() > NUMBER_MAX_DIGITS {
            return Err(number_overflow());
        }
        return Ok(sum.to_string());
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) if (x + y).abs() < 1e38 => Ok((x + y).to_string()),
        (Ok(_), Ok(_)) => Err(number_overflow()),
        _ => Err(operand_type_error()),
    }
}

fn apply_update(item: &mut Item, update: &UpdateExpression) -> Result<(), EngineError> {
    for action in update.actions() {
        match action {
            UpdateAction::Set(path, value) => set_path(item, path, value.clone())?,
            UpdateAction::Add(path, value) => {
                let merged = match (resolve(item, path), value) {
                    (None, AttributeValue::Ss(_) | AttributeValue::N(_)) => value.clone(),
                    (Some(AttributeValue::Ss(cur)), AttributeValue::Ss(new)) => {
                        AttributeValue::Ss(union(cur, new))
                    }
                    (Some(AttributeValue::N(cur)), AttributeValue::N(delta)) => {
                        AttributeValue::N(add_numbers(cur, delta)?)
                    }
                    _ => return Err(operand_type_error()),
                };
                set_path(item, path, merged)?;
            }
            UpdateAction::Delete(path, value) => {
                let remaining = match (resolve(item, path), value) {
                    (None, _) => continue,
                    (Some(AttributeValue::Ss(cur)), AttributeValue::Ss(gone)) => {
                        let kept: Vec<String> =
                            cur.iter().filter(|v| !gone.contains(v)).cloned().collect();
                        (!kept.is_empty()).then_some(AttributeValue::Ss(kept))
                    }
                    _ => return Err(operand_type_error()),
                };
                // Sets cannot be empty; a fully drained set disappears.
                match remaining {
                    Some(set) => set_path(item, path, set)?,
                    None => remove_path(item, path),
                }
            }
        }
    }
    Ok(())
}

fn ensure_no_key_updates(schema: &KeySchema, update: &UpdateExpression) -> Result<(), EngineError> {
    match update
        .actions()
        .iter()
        .find(|action| schema.is_key_attribute(action.path().root()))
    {
        Some(action) => Err(EngineError::Validation(format!(
            "Cannot update attribute {}. This attribute is part of the key",
            action.path()
        ))),
        None => Ok(()),
    }
}

/// Compute the item an update would produce, without storing it.
fn updated_item(
    table: &Table,
    stored: &StoredKey,
    key: &Key,
    update: &UpdateExpression,
    condition: Option<&Condition>,
) -> Result<Item, EngineError> {
    ensure_no_key_updates(&table.schema, update)?;
    let existing = table.items.get(stored);
    if let Some(condition) = condition
        && !evaluate(condition, existing)
    {
        return Err(EngineError::ConditionFailed);
    }
    let mut item = existing.cloned().unwrap_or_else(|| key.to_item());
    apply_update(&mut item, update)?;
    Ok(item)
}

/// Staged effect of one transaction action.
enum Staged {
    Check,
    Store(String, StoredKey, Item),
    Remove(String, StoredKey),
}

fn action_partition(action: &TransactAction) -> Option<&AttributeValue> {
    match action {
        TransactAction::ConditionCheck { key, .. }
        | TransactAction::Delete { key, .. }
        | TransactAction::Update { key, .. } => Some(&key.partition().value),
        TransactAction::Put { .. } => None,
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> Result<(), EngineError> {
        let mut tables = self.tables.write().await;
        let table_data = table_mut(&mut tables, table)?;
        let key = table_data.key_of(&item)?;
        self.check_fault(EngineOp::Put, [&key.partition().value])?;
        let stored = table_data.stored_key(&key)?;

        if let Some(condition) = &condition
            && !evaluate(condition, table_data.items.get(&stored))
        {
            return Err(EngineError::ConditionFailed);
        }
        table_data.items.insert(stored, item);
        Ok(())
    }

    async fn get_item(
        &self,
        table: &str,
        key: &Key,
        _consistent_read: bool,
    ) -> Result<Option<Item>, EngineError> {
        self.check_fault(EngineOp::Get, [&key.partition().value])?;
        let tables = self.tables.read().await;
        let table_data = table_ref(&tables, table)?;
        let stored = table_data.stored_key(key)?;
        Ok(table_data.items.get(&stored).cloned())
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), EngineError> {
        self.check_fault(EngineOp::Delete, [&key.partition().value])?;
        let mut tables = self.tables.write().await;
        let table_data = table_mut(&mut tables, table)?;
        let stored = table_data.stored_key(key)?;
        table_data.items.remove(&stored);
        Ok(())
    }

    async fn query(&self, table: &str, request: &QueryRequest) -> Result<Vec<Item>, EngineError> {
        self.check_fault(EngineOp::Query, [&request.partition.value])?;
        let tables = self.tables.read().await;
        let table_data = table_ref(&tables, table)?;
        let schema = match &request.index_name {
            Some(_) if request.consistent_read => {
                return Err(EngineError::Validation(
                    "Consistent reads are not supported on global secondary indexes".into(),
                ));
            }
            Some(index) => table_data.indexes.get(index).ok_or_else(|| {
                EngineError::Validation(format!(
                    "The table does not have the specified index: {}",
                    index
                ))
            })?,
            None => &table_data.schema,
        };
        if request.partition.name != schema.partition_key {
            return Err(EngineError::Validation(
                "Query condition missed key schema element".into(),
            ));
        }
        if request.projection.as_ref().is_some_and(Vec::is_empty) {
            return Err(EngineError::Validation(
                "Invalid ProjectionExpression: The expression can not be empty".into(),
            ));
        }
        let partition = KeyPart::from_value(&request.partition.value)?;
        let sort_condition = request.sort.as_ref().map(|s| s.as_condition());

        let mut matched: Vec<(Option<KeyPart>, &Item)> = table_data
            .items
            .values()
            .filter_map(|item| {
                let (pk, sk) = index_key(schema, item)?;
                (pk == partition).then_some((sk, item))
            })
            .filter(|(_, item)| {
                sort_condition
                    .as_ref()
                    .is_none_or(|cond| evaluate(cond, Some(*item)))
            })
            .filter(|(_, item)| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|cond| evaluate(cond, Some(*item)))
            })
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(matched
            .into_iter()
            .map(|(_, item)| match &request.projection {
                Some(paths) => project(item, paths),
                None => item.clone(),
            })
            .collect())
    }

    async fn scan(&self, table: &str, filter: Option<&Condition>) -> Result<Vec<Item>, EngineError> {
        self.check_fault(EngineOp::Scan, None::<&AttributeValue>)?;
        let tables = self.tables.read().await;
        let table_data = table_ref(&tables, table)?;
        Ok(table_data
            .items
            .values()
            .filter(|item| filter.is_none_or(|cond| evaluate(cond, Some(*item))))
            .cloned()
            .collect())
    }

    async fn batch_get(&self, table: &str, keys: &[Key]) -> Result<BatchGetOutput, EngineError> {
        if keys.is_empty() || keys.len() > BATCH_GET_MAX_ITEMS {
            return Err(EngineError::Validation(format!(
                "BatchGetItem accepts 1 to {} keys (got {})",
                BATCH_GET_MAX_ITEMS,
                keys.len()
            )));
        }
        ensure_distinct(keys)?;
        self.check_fault(EngineOp::BatchGet, keys.iter().map(|k| &k.partition().value))?;

        let tables = self.tables.read().await;
        let table_data = table_ref(&tables, table)?;
        let items = keys
            .iter()
            .map(|key| table_data.stored_key(key))
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .filter_map(|stored| table_data.items.get(stored).cloned())
            .collect();
        Ok(BatchGetOutput {
            items,
            unprocessed: Vec::new(),
        })
    }

    async fn batch_delete(
        &self,
        table: &str,
        keys: &[Key],
    ) -> Result<BatchWriteOutput, EngineError> {
        if keys.is_empty() || keys.len() > BATCH_WRITE_MAX_ITEMS {
            return Err(EngineError::Validation(format!(
                "BatchWriteItem accepts 1 to {} requests (got {})",
                BATCH_WRITE_MAX_ITEMS,
                keys.len()
            )));
        }
        ensure_distinct(keys)?;
        self.check_fault(EngineOp::BatchDelete, keys.iter().map(|k| &k.partition().value))?;

        let mut tables = self.tables.write().await;
        let table_data = table_mut(&mut tables, table)?;
        let stored: Vec<StoredKey> = keys
            .iter()
            .map(|key| table_data.stored_key(key))
            .collect::<Result<_, _>>()?;
        for key in &stored {
            table_data.items.remove(key);
        }
        Ok(BatchWriteOutput::default())
    }

    async fn transact_write(&self, actions: Vec<TransactAction>) -> Result<(), EngineError> {
        if actions.is_empty() || actions.len() > TRANSACTION_MAX_ITEMS {
            return Err(EngineError::Validation(format!(
                "TransactWriteItems accepts 1 to {} actions (got {})",
                TRANSACTION_MAX_ITEMS,
                actions.len()
            )));
        }
        self.check_fault(EngineOp::TransactWrite, actions.iter().filter_map(action_partition))?;

        let mut tables = self.tables.write().await;

        // Stage every action against the current state; nothing is written
        // unless all of them pass.
        let mut staged = Vec::with_capacity(actions.len());
        let mut touched: Vec<(String, StoredKey)> = Vec::with_capacity(actions.len());
        for action in &actions {
            let table_data = table_ref(&tables, action.table())?;
            let (stored, effect) = match action {
                TransactAction::ConditionCheck { key, condition, .. } => {
                    let stored = table_data.stored_key(key)?;
                    if !evaluate(condition, table_data.items.get(&stored)) {
                        return Err(EngineError::ConditionFailed);
                    }
                    (stored, Staged::Check)
                }
                TransactAction::Put {
                    table,
                    item,
                    condition,
                } => {
                    let stored = table_data.stored_key(&table_data.key_of(item)?)?;
                    if let Some(condition) = condition
                        && !evaluate(condition, table_data.items.get(&stored))
                    {
                        return Err(EngineError::ConditionFailed);
                    }
                    (stored.clone(), Staged::Store(table.clone(), stored, item.clone()))
                }
                TransactAction::Delete {
                    table,
                    key,
                    condition,
                } => {
                    let stored = table_data.stored_key(key)?;
                    if let Some(condition) = condition
                        && !evaluate(condition, table_data.items.get(&stored))
                    {
                        return Err(EngineError::ConditionFailed);
                    }
                    (stored.clone(), Staged::Remove(table.clone(), stored))
                }
                TransactAction::Update {
                    table,
                    key,
                    update,
                    condition,
                } => {
                    let stored = table_data.stored_key(key)?;
                    let item = updated_item(table_data, &stored, key, update, condition.as_ref())?;
                    (stored.clone(), Staged::Store(table.clone(), stored, item))
                }
            };
            let target = (action.table().to_string(), stored);
            if touched.contains(&target) {
                return Err(EngineError::Validation(
                    "Transaction request cannot include multiple operations on one item".into(),
                ));
            }
            touched.push(target);
            staged.push(effect);
        }

        for effect in staged {
            match effect {
                Staged::Check => {}
                Staged::Store(table, stored, item) => {
                    table_mut(&mut tables, &table)?.items.insert(stored, item);
                }
                Staged::Remove(table, stored) => {
                    table_mut(&mut tables, &table)?.items.remove(&stored);
                }
            }
        }
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        update: &UpdateExpression,
        condition: Option<Condition>,
    ) -> Result<(), EngineError> {
        if update.is_empty() {
            return Err(EngineError::Validation(
                "Update expression must contain at least one clause".into(),
            ));
        }
        self.check_fault(EngineOp::UpdateItem, [&key.partition().value])?;
        let mut tables = self.tables.write().await;
        let table_data = table_mut(&mut tables, table)?;
        let stored = table_data.stored_key(key)?;
        let item = updated_item(table_data, &stored, key, update, condition.as_ref())?;
        table_data.items.insert(stored, item);
        Ok(())
    }
}
