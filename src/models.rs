//! Record types stored by the access layer and their item mappings.

use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::conversions::{
    number_value, optional_map, optional_number, optional_string, required_string, string_set,
    string_set_value, string_value,
};
use crate::engine::{Item, Key, KeySchema};
use crate::errors::{AccessError, Result};

pub const PARTITION_KEY: &str = "pk";
pub const SORT_KEY: &str = "sk";
pub const TTL: &str = "ttl";

pub const EVENT_TYPE: &str = "eventType";
pub const EVENT_DATA: &str = "eventData";

pub const ADMINS: &str = "admins";
pub const ORGANIZATION: &str = "organization";
pub const EMAIL_ADDRESS: &str = "emailAddress";
pub const PHONE_NUMBERS: &str = "phoneNumbers";
pub const MOBILE_NUMBER: &str = "MobileNumber";

pub const SUBSCRIPTION_TYPE: &str = "subscriptionType";
pub const WEBSITE: &str = "website";

pub const STATUS: &str = "status";
/// Secondary index of the tenants table keyed by [`STATUS`].
pub const STATUS_INDEX: &str = "status-index";

/// Key layout of the events table.
pub fn events_schema() -> KeySchema {
    KeySchema::composite(PARTITION_KEY, SORT_KEY)
}

/// Key layout of the tenants table (authorization and target records).
pub fn tenants_schema() -> KeySchema {
    KeySchema::simple(PARTITION_KEY)
}

pub fn status_index_schema() -> KeySchema {
    KeySchema::simple(STATUS)
}

/// One event written to a shard of a daily bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedRecord {
    /// `<namespace>#<YYYY-MM-DD>#SHARD<k>`
    pub partition_key: String,
    /// `<write-timestamp-millis>#<record-id>`
    pub sort_key: String,
    pub event_type: String,
    pub event_data: String,
    /// Expiry in epoch seconds.
    pub ttl: Option<i64>,
}

impl ShardedRecord {
    pub fn key(&self) -> Key {
        Key::string(PARTITION_KEY, &self.partition_key)
            .with_string_sort(SORT_KEY, &self.sort_key)
    }

    pub fn to_item(&self) -> Item {
        let mut item = self.key().to_item();
        item.insert(EVENT_TYPE.into(), string_value(&self.event_type));
        item.insert(EVENT_DATA.into(), string_value(&self.event_data));
        if let Some(ttl) = self.ttl {
            item.insert(TTL.into(), number_value(ttl));
        }
        item
    }

    pub fn try_from_item(item: &Item) -> Result<Self> {
        Ok(ShardedRecord {
            partition_key: required_string(item, PARTITION_KEY)?,
            sort_key: required_string(item, SORT_KEY)?,
            event_type: required_string(item, EVENT_TYPE)?,
            event_data: optional_string(item, EVENT_DATA)?.unwrap_or_default(),
            ttl: optional_number(item, TTL)?,
        })
    }

    /// Write timestamp (millis) encoded in the sort key.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.sort_key.split_once('#')?.0.parse().ok()
    }

    /// Caller-supplied record id encoded in the sort key.
    pub fn record_id(&self) -> Option<&str> {
        self.sort_key.split_once('#').map(|(_, id)| id)
    }
}

/// Membership record gating mutations of a target record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub pk: String,
    pub organization: String,
    /// Authorized identities; stored as a string set.
    pub admins: Vec<String>,
    pub email_address: Option<String>,
    pub mobile_number: Option<String>,
    pub ttl: Option<i64>,
}

impl AuthorizationRecord {
    pub fn key(&self) -> Key {
        Key::string(PARTITION_KEY, &self.pk)
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        self.admins.iter().any(|admin| admin == identity)
    }

    pub fn to_item(&self) -> Item {
        let mut item = self.key().to_item();
        item.insert(ORGANIZATION.into(), string_value(&self.organization));
        if let Some(admins) = string_set_value(self.admins.iter().cloned()) {
            item.insert(ADMINS.into(), admins);
        }
        if let Some(email) = &self.email_address {
            item.insert(EMAIL_ADDRESS.into(), string_value(email));
        }
        if let Some(mobile) = &self.mobile_number {
            let phones = HashMap::from([(MOBILE_NUMBER.to_string(), string_value(mobile))]);
            item.insert(PHONE_NUMBERS.into(), AttributeValue::M(phones));
        }
        if let Some(ttl) = self.ttl {
            item.insert(TTL.into(), number_value(ttl));
        }
        item
    }

    pub fn try_from_item(item: &Item) -> Result<Self> {
        let mobile_number = match optional_map(item, PHONE_NUMBERS)? {
            Some(phones) => optional_string(phones, MOBILE_NUMBER)?,
            None => None,
        };
        Ok(AuthorizationRecord {
            pk: required_string(item, PARTITION_KEY)?,
            organization: required_string(item, ORGANIZATION)?,
            admins: string_set(item, ADMINS)?,
            email_address: optional_string(item, EMAIL_ADDRESS)?,
            mobile_number,
            ttl: optional_number(item, TTL)?,
        })
    }
}

/// Subscription tier of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionTier {
    Enterprise,
    Pro,
    Free,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Enterprise => "ENTERPRISE",
            SubscriptionTier::Pro => "PRO",
            SubscriptionTier::Free => "FREE",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ENTERPRISE" => Ok(SubscriptionTier::Enterprise),
            "PRO" => Ok(SubscriptionTier::Pro),
            "FREE" => Ok(SubscriptionTier::Free),
            other => Err(AccessError::Decode(format!(
                "unknown subscription type '{}'",
                other
            ))),
        }
    }
}

/// The protected resource: a tenant's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub pk: String,
    pub organization: String,
    pub subscription_type: SubscriptionTier,
    pub website: Option<String>,
    pub ttl: Option<i64>,
}

impl TargetRecord {
    pub fn key(&self) -> Key {
        Key::string(PARTITION_KEY, &self.pk)
    }

    pub fn to_item(&self) -> Item {
        let mut item = self.key().to_item();
        item.insert(ORGANIZATION.into(), string_value(&self.organization));
        item.insert(
            SUBSCRIPTION_TYPE.into(),
            string_value(self.subscription_type.as_str()),
        );
        if let Some(website) = &self.website {
            item.insert(WEBSITE.into(), string_value(website));
        }
        if let Some(ttl) = self.ttl {
            item.insert(TTL.into(), number_value(ttl));
        }
        item
    }

    pub fn try_from_item(item: &Item) -> Result<Self> {
        Ok(TargetRecord {
            pk: required_string(item, PARTITION_KEY)?,
            organization: required_string(item, ORGANIZATION)?,
            subscription_type: required_string(item, SUBSCRIPTION_TYPE)?.parse()?,
            website: optional_string(item, WEBSITE)?,
            ttl: optional_number(item, TTL)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_record() -> AuthorizationRecord {
        AuthorizationRecord {
            pk: "ADMIN#acme".into(),
            organization: "Acme".into(),
            admins: vec!["Alice".into(), "Bob".into()],
            email_address: Some("billing@acme.io".into()),
            mobile_number: Some("555-0100".into()),
            ttl: None,
        }
    }

    #[test]
    fn authorization_record_nests_mobile_number() {
        let item = admin_record().to_item();
        match &item[PHONE_NUMBERS] {
            AttributeValue::M(phones) => assert_eq!(phones[MOBILE_NUMBER], string_value("555-0100")),
            other => panic!("expected map, got {:?}", other),
        }
        assert_eq!(AuthorizationRecord::try_from_item(&item).unwrap(), admin_record());
    }

    #[test]
    fn empty_admin_set_is_omitted() {
        let record = AuthorizationRecord {
            admins: Vec::new(),
            ..admin_record()
        };
        assert!(!record.to_item().contains_key(ADMINS));
    }

    #[test]
    fn target_with_unknown_tier_fails_to_decode() {
        let mut item = TargetRecord {
            pk: "TENANT#acme".into(),
            organization: "Acme".into(),
            subscription_type: SubscriptionTier::Pro,
            website: None,
            ttl: Some(1_700_000_000),
        }
        .to_item();
        assert_eq!(item[SUBSCRIPTION_TYPE], string_value("PRO"));
        item.insert(SUBSCRIPTION_TYPE.into(), string_value("PLATINUM"));
        assert!(matches!(
            TargetRecord::try_from_item(&item),
            Err(AccessError::Decode(_))
        ));
    }

    #[test]
    fn sort_key_exposes_timestamp_and_id() {
        let record = ShardedRecord {
            partition_key: "EVENTS#2024-03-01#SHARD2".into(),
            sort_key: "1709251200000#evt#7".into(),
            event_type: "LOGIN".into(),
            event_data: "{}".into(),
            ttl: None,
        };
        assert_eq!(record.timestamp_millis(), Some(1_709_251_200_000));
        assert_eq!(record.record_id(), Some("evt#7"));
        assert_eq!(ShardedRecord::try_from_item(&record.to_item()).unwrap(), record);
    }
}
