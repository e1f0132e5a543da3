//! Typed access to DynamoDB `AttributeValue` items.
//!
//! Record types read their fields through these helpers so a stored item with
//! the wrong shape surfaces as [`AccessError::Decode`] naming the attribute.

use aws_sdk_dynamodb::types::AttributeValue;
use std::fmt::Display;
use std::str::FromStr;

use crate::engine::Item;
use crate::errors::{AccessError, Result};

/// String attribute value.
pub fn string_value(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

/// Number attribute value (DynamoDB numbers travel as strings).
pub fn number_value(value: impl Display) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// String-set attribute value, or `None` for an empty set (DynamoDB rejects
/// empty sets). Duplicates are dropped, first occurrence wins.
pub fn string_set_value<I, S>(values: I) -> Option<AttributeValue>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let set = values.into_iter().map(Into::into).fold(Vec::new(), |mut acc: Vec<String>, v| {
        if !acc.contains(&v) {
            acc.push(v);
        }
        acc
    });
    (!set.is_empty()).then_some(AttributeValue::Ss(set))
}

fn type_mismatch(name: &str, expected: &str, actual: &AttributeValue) -> AccessError {
    AccessError::Decode(format!(
        "attribute '{}' should be {} but was {:?}",
        name, expected, actual
    ))
}

fn missing(name: &str) -> AccessError {
    AccessError::Decode(format!("missing required attribute '{}'", name))
}

pub fn optional_string(item: &Item, name: &str) -> Result<Option<String>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(true)) => Ok(None),
        Some(AttributeValue::S(s)) => Ok(Some(s.clone())),
        Some(other) => Err(type_mismatch(name, "a string", other)),
    }
}

pub fn required_string(item: &Item, name: &str) -> Result<String> {
    optional_string(item, name)?.ok_or_else(|| missing(name))
}

pub fn optional_number<T: FromStr>(item: &Item, name: &str) -> Result<Option<T>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(true)) => Ok(None),
        Some(AttributeValue::N(n)) => n.parse().map(Some).map_err(|_| {
            AccessError::Decode(format!("attribute '{}' is not a valid number: {}", name, n))
        }),
        Some(other) => Err(type_mismatch(name, "a number", other)),
    }
}

/// String set members; a missing attribute is an empty set.
pub fn string_set(item: &Item, name: &str) -> Result<Vec<String>> {
    match item.get(name) {
        None => Ok(Vec::new()),
        Some(AttributeValue::Ss(values)) => Ok(values.clone()),
        Some(other) => Err(type_mismatch(name, "a string set", other)),
    }
}

pub fn optional_map<'a>(item: &'a Item, name: &str) -> Result<Option<&'a Item>> {
    match item.get(name) {
        None => Ok(None),
        Some(AttributeValue::M(map)) => Ok(Some(map)),
        Some(other) => Err(type_mismatch(name, "a map", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: Vec<(&str, AttributeValue)>) -> Item {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn reads_present_and_missing_strings() {
        let item = item(vec![("organization", string_value("Acme"))]);
        assert_eq!(required_string(&item, "organization").unwrap(), "Acme");
        assert_eq!(optional_string(&item, "website").unwrap(), None);
        assert!(matches!(
            required_string(&item, "website"),
            Err(AccessError::Decode(_))
        ));
    }

    #[test]
    fn wrong_type_is_a_decode_error() {
        let item = item(vec![("ttl", string_value("tomorrow"))]);
        let err = optional_number::<i64>(&item, "ttl").unwrap_err();
        assert!(err.to_string().contains("'ttl'"));
    }

    #[test]
    fn numbers_parse_into_the_requested_type() {
        let item = item(vec![("ttl", number_value(1_700_000_000u64))]);
        assert_eq!(optional_number::<u64>(&item, "ttl").unwrap(), Some(1_700_000_000));
    }

    #[test]
    fn empty_string_set_is_not_representable() {
        assert!(string_set_value(Vec::<String>::new()).is_none());
        assert_eq!(
            string_set_value(["Alice", "Bob", "Alice"]),
            Some(AttributeValue::Ss(vec!["Alice".into(), "Bob".into()]))
        );
    }

    #[test]
    fn missing_set_reads_as_empty() {
        assert!(string_set(&Item::new(), "admins").unwrap().is_empty());
    }
}
