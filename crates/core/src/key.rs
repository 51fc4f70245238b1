//! Key values and item key resolution.

use std::fmt;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::{Error, Result};
use crate::schema::{AttributeType, TableSchema};
use crate::Item;

/// A partition or sort key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    String(String),
    /// Numbers travel in their decimal string form.
    Number(String),
    Binary(Vec<u8>),
}

impl KeyValue {
    pub fn number(value: impl fmt::Display) -> Self {
        KeyValue::Number(value.to_string())
    }

    pub fn attribute_type(&self) -> AttributeType {
        match self {
            KeyValue::String(_) => AttributeType::String,
            KeyValue::Number(_) => AttributeType::Number,
            KeyValue::Binary(_) => AttributeType::Binary,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            KeyValue::String(s) | KeyValue::Number(s) => s.is_empty(),
            KeyValue::Binary(b) => b.is_empty(),
        }
    }

    pub fn to_attribute_value(&self) -> AttributeValue {
        match self {
            KeyValue::String(s) => AttributeValue::S(s.clone()),
            KeyValue::Number(n) => AttributeValue::N(n.clone()),
            KeyValue::Binary(b) => AttributeValue::B(Blob::new(b.clone())),
        }
    }

    /// Returns `None` for attribute values that cannot be key values.
    pub fn from_attribute_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::S(s) => Some(KeyValue::String(s.clone())),
            AttributeValue::N(n) => Some(KeyValue::Number(n.clone())),
            AttributeValue::B(b) => Some(KeyValue::Binary(b.as_ref().to_vec())),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::String(s) | KeyValue::Number(s) => f.write_str(s),
            KeyValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::String(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::String(value)
    }
}

impl From<&String> for KeyValue {
    fn from(value: &String) -> Self {
        KeyValue::String(value.clone())
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::number(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::number(value)
    }
}

impl From<u64> for KeyValue {
    fn from(value: u64) -> Self {
        KeyValue::number(value)
    }
}

impl From<Vec<u8>> for KeyValue {
    fn from(value: Vec<u8>) -> Self {
        KeyValue::Binary(value)
    }
}

/// The full primary key of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    pub identity_field: String,
    pub identity: KeyValue,
    pub sort: Option<(String, KeyValue)>,
}

impl ItemKey {
    /// Resolves and validates a key against `schema`.
    ///
    /// Empty values and a missing range value on a range-keyed table are
    /// `InvalidArgument`; a range value for a table without a sort field is
    /// a `Configuration` error.
    pub fn resolve(
        schema: &TableSchema,
        identity: &KeyValue,
        range: Option<&KeyValue>,
    ) -> Result<Self> {
        check_value(schema, &schema.identity_field, identity)?;

        let sort = match (&schema.sort_field, range) {
            (Some(field), Some(value)) => {
                check_value(schema, field, value)?;
                Some((field.clone(), value.clone()))
            }
            (Some(field), None) => {
                return Err(Error::InvalidArgument(format!(
                    "table '{}' is range-keyed; a value for '{}' is required",
                    schema.table_name, field
                )));
            }
            (None, Some(_)) => {
                return Err(Error::Configuration(format!(
                    "range value supplied but table '{}' declares no sort field",
                    schema.table_name
                )));
            }
            (None, None) => None,
        };

        Ok(Self {
            identity_field: schema.identity_field.clone(),
            identity: identity.clone(),
            sort,
        })
    }

    /// Extracts the key of a marshalled record.
    pub fn from_item(schema: &TableSchema, item: &Item) -> Result<Self> {
        let identity = key_attribute(schema, item, &schema.identity_field)?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "record is missing identity field '{}'",
                schema.identity_field
            ))
        })?;
        let range = match &schema.sort_field {
            Some(field) => key_attribute(schema, item, field)?,
            None => None,
        };
        Self::resolve(schema, &identity, range.as_ref())
    }

    /// The key as an attribute map, suitable for get/delete requests.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(
            self.identity_field.clone(),
            self.identity.to_attribute_value(),
        );
        if let Some((field, value)) = &self.sort {
            item.insert(field.clone(), value.to_attribute_value());
        }
        item
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.identity_field, self.identity)?;
        if let Some((field, value)) = &self.sort {
            write!(f, ", {}={}", field, value)?;
        }
        Ok(())
    }
}

fn key_attribute(schema: &TableSchema, item: &Item, field: &str) -> Result<Option<KeyValue>> {
    match item.get(field) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(value) => KeyValue::from_attribute_value(value).map(Some).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "key field '{}' of table '{}' must be a string, number or binary",
                field, schema.table_name
            ))
        }),
    }
}

fn check_value(schema: &TableSchema, field: &str, value: &KeyValue) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "empty value for key field '{}'",
            field
        )));
    }
    if let Some(declared) = schema.attribute_types.get(field) {
        if *declared != value.attribute_type() {
            return Err(Error::InvalidArgument(format!(
                "key field '{}' expects type {} but got {}",
                field,
                declared.tag(),
                value.attribute_type().tag()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_schema() -> TableSchema {
        TableSchema::new("events", "stream", AttributeType::String)
            .with_sort_field("seq", AttributeType::Number)
    }

    #[test]
    fn test_resolve_full_key() {
        let key = ItemKey::resolve(&events_schema(), &"orders".into(), Some(&42i64.into())).unwrap();
        assert_eq!(key.to_string(), "stream=orders, seq=42");

        let item = key.to_item();
        assert_eq!(item.get("stream"), Some(&AttributeValue::S("orders".to_string())));
        assert_eq!(item.get("seq"), Some(&AttributeValue::N("42".to_string())));
    }

    #[test]
    fn test_empty_identity_rejected() {
        let result = ItemKey::resolve(&events_schema(), &"".into(), Some(&1i64.into()));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_range_rejected() {
        let result = ItemKey::resolve(&events_schema(), &"orders".into(), None);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_range_without_sort_field_is_configuration_error() {
        let schema = TableSchema::new("users", "id", AttributeType::String);
        let result = ItemKey::resolve(&schema, &"a1".into(), Some(&"x".into()));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let result = ItemKey::resolve(&events_schema(), &"orders".into(), Some(&"one".into()));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_from_item_requires_identity() {
        let mut item = Item::new();
        item.insert("seq".to_string(), AttributeValue::N("1".to_string()));

        let result = ItemKey::from_item(&events_schema(), &item);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_from_item_with_empty_string_identity() {
        let mut item = Item::new();
        item.insert("stream".to_string(), AttributeValue::S(String::new()));
        item.insert("seq".to_string(), AttributeValue::N("1".to_string()));

        let result = ItemKey::from_item(&events_schema(), &item);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
