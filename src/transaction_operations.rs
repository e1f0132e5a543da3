//! Transaction operations module.
//!
//! Mutations of tenant records gated by an authorization record. The gate
//! and the mutation run in one transaction: either both apply or neither does.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::basic_operations::SingleItemRepository;
use crate::conversions::{string_set_value, string_value};
use crate::engine::{Key, StorageEngine, TransactAction};
use crate::errors::{AccessError, EngineError, Result};
use crate::expressions::{AttributePath, Condition, UpdateExpression};
use crate::models::{
    ADMINS, AuthorizationRecord, EMAIL_ADDRESS, MOBILE_NUMBER, PHONE_NUMBERS, TargetRecord,
    tenants_schema,
};

/// Maximum actions per transaction (DynamoDB limit).
pub const TRANSACTION_MAX_ITEMS: usize = 10;

/// Authorization-gated mutations on the tenants table.
#[derive(Clone)]
pub struct TransactionalMutationCoordinator {
    engine: Arc<dyn StorageEngine>,
    table: String,
    records: SingleItemRepository,
}

fn validate_key(key: &Key) -> Result<()> {
    key.validate().map_err(AccessError::Validation)
}

impl TransactionalMutationCoordinator {
    pub fn new(engine: Arc<dyn StorageEngine>, table: impl Into<String>) -> Self {
        let table = table.into();
        let records = SingleItemRepository::new(Arc::clone(&engine), table.clone(), tenants_schema());
        TransactionalMutationCoordinator {
            engine,
            table,
            records,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Delete `target_key` if `identity` is in the `admins` set of `auth_key`.
    ///
    /// Fails with `AuthorizationFailure` when the identity is not a member or
    /// the authorization record does not exist; nothing is deleted then.
    pub async fn delete_with_authorization(
        &self,
        target_key: &Key,
        auth_key: &Key,
        identity: &str,
    ) -> Result<()> {
        if identity.is_empty() {
            return Err(AccessError::Validation("identity must not be empty".into()));
        }
        validate_key(target_key)?;
        validate_key(auth_key)?;
        if target_key == auth_key {
            return Err(AccessError::Validation(
                "target and authorization record must be different items".into(),
            ));
        }

        let actions = vec![
            TransactAction::ConditionCheck {
                table: self.table.clone(),
                key: auth_key.clone(),
                condition: Condition::contains(ADMINS, string_value(identity)),
            },
            TransactAction::Delete {
                table: self.table.clone(),
                key: target_key.clone(),
                condition: None,
            },
        ];

        match self.engine.transact_write(actions).await {
            Ok(()) => {
                info!(table = %self.table, target = %target_key, identity, "Deleted item with authorization");
                Ok(())
            }
            Err(EngineError::ConditionFailed) => {
                warn!(table = %self.table, target = %target_key, auth = %auth_key, identity, "Authorization check failed");
                Err(AccessError::AuthorizationFailure {
                    identity: identity.to_string(),
                    auth_key: auth_key.to_string(),
                })
            }
            Err(err) => {
                error!(
                    table = %self.table,
                    target = %target_key,
                    identity,
                    error = %err,
                    "Delete request failed"
                );
                Err(err.into())
            }
        }
    }

    /// Add members and replace contact details on an authorization record.
    ///
    /// Only present, non-empty inputs produce a clause. Setting the phone
    /// number requires the record to already hold a `phoneNumbers` map.
    pub async fn update_authorization_set(
        &self,
        auth_key: &Key,
        additions: &[String],
        new_email: Option<&str>,
        new_phone: Option<&str>,
    ) -> Result<()> {
        validate_key(auth_key)?;

        let mut update = UpdateExpression::new();
        if let Some(members) = string_set_value(additions.iter().cloned()) {
            update = update.add(ADMINS, members);
        }
        if let Some(email) = new_email.filter(|e| !e.is_empty()) {
            update = update.set(EMAIL_ADDRESS, string_value(email));
        }
        if let Some(phone) = new_phone.filter(|p| !p.is_empty()) {
            update = update.set(
                AttributePath::nested([PHONE_NUMBERS, MOBILE_NUMBER]),
                string_value(phone),
            );
        }
        if update.is_empty() {
            return Err(AccessError::Validation(
                "no additions, email or phone number to update".into(),
            ));
        }

        self.engine
            .update_item(&self.table, auth_key, &update, None)
            .await
            .inspect_err(|err| {
                error!(table = %self.table, key = %auth_key, error = %err, "Failed to update authorization record")
            })?;
        info!(table = %self.table, key = %auth_key, clauses = update.actions().len(), "Updated authorization record");
        Ok(())
    }

    /// Remove members from an authorization record's `admins` set.
    pub async fn remove_from_authorization_set(&self, auth_key: &Key, removals: &[String]) -> Result<()> {
        validate_key(auth_key)?;
        let members = string_set_value(removals.iter().cloned())
            .ok_or_else(|| AccessError::Validation("no members to remove".into()))?;

        let update = UpdateExpression::new().delete(ADMINS, members);
        self.engine
            .update_item(&self.table, auth_key, &update, None)
            .await
            .inspect_err(|err| {
                error!(table = %self.table, key = %auth_key, error = %err, "Failed to remove members")
            })?;
        info!(table = %self.table, key = %auth_key, removed = removals.len(), "Removed authorization members");
        Ok(())
    }

    pub async fn get_authorization_record(&self, auth_key: &Key) -> Result<AuthorizationRecord> {
        let item = self.records.fetch_consistent(auth_key).await?;
        AuthorizationRecord::try_from_item(&item)
    }

    pub async fn create_authorization_record(&self, record: &AuthorizationRecord) -> Result<()> {
        self.records.create_once(record.to_item()).await
    }

    pub async fn create_target(&self, record: &TargetRecord) -> Result<()> {
        self.records.create_once(record.to_item()).await
    }

    pub async fn get_target(&self, target_key: &Key) -> Result<TargetRecord> {
        let item = self.records.fetch_consistent(target_key).await?;
        TargetRecord::try_from_item(&item)
    }
}
