//! DynamoDB client module.
//!
//! Builds the AWS SDK client from a [`ClientConfig`] and adapts it to the
//! [`StorageEngine`] contract. Supported credential sources:
//! - Hardcoded credentials
//! - AWS profiles
//! - The default chain (environment variables, instance profile, etc.)

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::Credentials;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    ConditionCheck, Delete, DeleteRequest, KeysAndAttributes, Put, TransactWriteItem, Update,
    WriteRequest,
};
use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::{
    BatchGetOutput, BatchWriteOutput, Item, Key, QueryRequest, StorageEngine, TransactAction,
};
use crate::errors::{EngineError, map_cancellation_reasons, map_sdk_error};
use crate::expressions::{Condition, ExpressionContext, UpdateExpression};

/// Build the AWS SDK DynamoDB client with the given configuration.
pub async fn build_client(config: &ClientConfig) -> Client {
    // Region priority: param > env var > default
    let region_provider = RegionProviderChain::first_try(
        config
            .region
            .clone()
            .map(aws_sdk_dynamodb::config::Region::new),
    )
    .or_default_provider()
    .or_else("us-east-1");

    let mut config_loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    // Credentials priority: hardcoded > profile > env/default chain
    if let (Some(ak), Some(sk)) = (&config.access_key, &config.secret_key) {
        let creds = Credentials::new(
            ak.clone(),
            sk.clone(),
            config.session_token.clone(),
            None,
            "dynakit-hardcoded",
        );
        config_loader = config_loader.credentials_provider(creds);
    } else if let Some(profile_name) = &config.profile {
        let profile_provider = ProfileFileCredentialsProvider::builder()
            .profile_name(profile_name)
            .build();
        config_loader = config_loader.credentials_provider(profile_provider);
    }

    let sdk_config = config_loader.load().await;

    let mut dynamo_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config);

    if let Some(url) = &config.endpoint_url {
        dynamo_config = dynamo_config.endpoint_url(url);
    }

    Client::from_conf(dynamo_config.build())
}

/// [`StorageEngine`] backed by DynamoDB.
#[derive(Debug, Clone)]
pub struct DynamoEngine {
    client: Client,
}

impl DynamoEngine {
    pub fn new(client: Client) -> Self {
        DynamoEngine { client }
    }

    pub async fn from_config(config: &ClientConfig) -> Self {
        DynamoEngine::new(build_client(config).await)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn build_error(what: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Validation(format!("Failed to build {}: {}", what, err))
}

/// Build one TransactWriteItem. Each action gets its own placeholder context.
fn build_transact_item(action: TransactAction) -> Result<TransactWriteItem, EngineError> {
    let mut ctx = ExpressionContext::new();
    match action {
        TransactAction::ConditionCheck {
            table,
            key,
            condition,
        } => {
            let expression = condition.render(&mut ctx);
            let (names, values) = ctx.into_parts();
            let check = ConditionCheck::builder()
                .table_name(table)
                .set_key(Some(key.to_item()))
                .condition_expression(expression)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .build()
                .map_err(|e| build_error("condition check", e))?;
            Ok(TransactWriteItem::builder().condition_check(check).build())
        }
        TransactAction::Put {
            table,
            item,
            condition,
        } => {
            let expression = condition.map(|c| c.render(&mut ctx));
            let (names, values) = ctx.into_parts();
            let put = Put::builder()
                .table_name(table)
                .set_item(Some(item))
                .set_condition_expression(expression)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .build()
                .map_err(|e| build_error("put", e))?;
            Ok(TransactWriteItem::builder().put(put).build())
        }
        TransactAction::Delete {
            table,
            key,
            condition,
        } => {
            let expression = condition.map(|c| c.render(&mut ctx));
            let (names, values) = ctx.into_parts();
            let delete = Delete::builder()
                .table_name(table)
                .set_key(Some(key.to_item()))
                .set_condition_expression(expression)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .build()
                .map_err(|e| build_error("delete", e))?;
            Ok(TransactWriteItem::builder().delete(delete).build())
        }
        TransactAction::Update {
            table,
            key,
            update,
            condition,
        } => {
            let update_expression = update.render(&mut ctx);
            let expression = condition.map(|c| c.render(&mut ctx));
            let (names, values) = ctx.into_parts();
            let update = Update::builder()
                .table_name(table)
                .set_key(Some(key.to_item()))
                .update_expression(update_expression)
                .set_condition_expression(expression)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values(values)
                .build()
                .map_err(|e| build_error("update", e))?;
            Ok(TransactWriteItem::builder().update(update).build())
        }
    }
}

#[async_trait]
impl StorageEngine for DynamoEngine {
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> Result<(), EngineError> {
        let mut ctx = ExpressionContext::new();
        let expression = condition.map(|c| c.render(&mut ctx));
        let (names, values) = ctx.into_parts();

        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .set_condition_expression(expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, Some(table)))?;
        Ok(())
    }

    async fn get_item(
        &self,
        table: &str,
        key: &Key,
        consistent_read: bool,
    ) -> Result<Option<Item>, EngineError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .consistent_read(consistent_read)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, Some(table)))?;
        Ok(output.item)
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), EngineError> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, Some(table)))?;
        Ok(())
    }

    async fn query(&self, table: &str, request: &QueryRequest) -> Result<Vec<Item>, EngineError> {
        let mut ctx = ExpressionContext::new();
        let mut key_condition = Condition::equals(
            request.partition.name.as_str(),
            request.partition.value.clone(),
        );
        if let Some(sort) = &request.sort {
            key_condition = key_condition.and(sort.as_condition());
        }
        let key_expression = key_condition.render(&mut ctx);
        let filter_expression = request.filter.as_ref().map(|f| f.render(&mut ctx));
        let projection_expression = request
            .projection
            .as_deref()
            .filter(|paths| !paths.is_empty())
            .map(|paths| ctx.projection(paths));
        let (names, values) = ctx.into_parts();

        let mut items = Vec::new();
        let mut start_key = None;
        let mut pages = 0usize;
        loop {
            let output = self
                .client
                .query()
                .table_name(table)
                .set_index_name(request.index_name.clone())
                .key_condition_expression(&key_expression)
                .set_filter_expression(filter_expression.clone())
                .set_projection_expression(projection_expression.clone())
                .set_expression_attribute_names(names.clone())
                .set_expression_attribute_values(values.clone())
                .consistent_read(request.consistent_read)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, Some(table)))?;
            pages += 1;
            items.extend(output.items.unwrap_or_default());
            match output.last_evaluated_key {
                Some(next) if !next.is_empty() => start_key = Some(next),
                _ => break,
            }
        }
        debug!(table, index = ?request.index_name, pages, count = items.len(), "Query complete");
        Ok(items)
    }

    async fn scan(&self, table: &str, filter: Option<&Condition>) -> Result<Vec<Item>, EngineError> {
        let mut ctx = ExpressionContext::new();
        let filter_expression = filter.map(|f| f.render(&mut ctx));
        let (names, values) = ctx.into_parts();

        let mut items = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(table)
                .set_filter_expression(filter_expression.clone())
                .set_expression_attribute_names(names.clone())
                .set_expression_attribute_values(values.clone())
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, Some(table)))?;
            items.extend(output.items.unwrap_or_default());
            match output.last_evaluated_key {
                Some(next) if !next.is_empty() => start_key = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }

    async fn batch_get(&self, table: &str, keys: &[Key]) -> Result<BatchGetOutput, EngineError> {
        let request = KeysAndAttributes::builder()
            .set_keys(Some(keys.iter().map(Key::to_item).collect()))
            .build()
            .map_err(|e| build_error("batch get request", e))?;

        let output = self
            .client
            .batch_get_item()
            .request_items(table, request)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, Some(table)))?;

        let items = output
            .responses
            .and_then(|mut responses| responses.remove(table))
            .unwrap_or_default();
        let unprocessed = output
            .unprocessed_keys
            .and_then(|mut pending| pending.remove(table))
            .map(|pending| pending.keys)
            .unwrap_or_default();
        Ok(BatchGetOutput { items, unprocessed })
    }

    async fn batch_delete(
        &self,
        table: &str,
        keys: &[Key],
    ) -> Result<BatchWriteOutput, EngineError> {
        let requests = keys
            .iter()
            .map(|key| {
                DeleteRequest::builder()
                    .set_key(Some(key.to_item()))
                    .build()
                    .map(|delete| WriteRequest::builder().delete_request(delete).build())
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| build_error("delete request", e))?;

        let output = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, Some(table)))?;

        let unprocessed = output
            .unprocessed_items
            .and_then(|mut pending| pending.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|request| request.delete_request.map(|delete| delete.key))
            .collect();
        Ok(BatchWriteOutput { unprocessed })
    }

    async fn transact_write(&self, actions: Vec<TransactAction>) -> Result<(), EngineError> {
        let transact_items = actions
            .into_iter()
            .map(build_transact_item)
            .collect::<Result<Vec<_>, _>>()?;

        self.client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
            .map_err(|err| {
                if let Some(TransactWriteItemsError::TransactionCanceledException(canceled)) =
                    err.as_service_error()
                {
                    return map_cancellation_reasons(
                        canceled.cancellation_reasons().iter().map(|r| r.code()),
                        canceled.message(),
                    );
                }
                map_sdk_error(err, None)
            })?;
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        update: &UpdateExpression,
        condition: Option<Condition>,
    ) -> Result<(), EngineError> {
        let mut ctx = ExpressionContext::new();
        let update_expression = update.render(&mut ctx);
        let condition_expression = condition.map(|c| c.render(&mut ctx));
        let (names, values) = ctx.into_parts();

        self.client
            .update_item()
            .table_name(table)
            .set_key(Some(key.to_item()))
            .update_expression(update_expression)
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, Some(table)))?;
        Ok(())
    }
}
