//! Conversion between records and the tagged attribute-value wire format.
//!
//! The encoding itself belongs to `serde_dynamo`. A [`Marshaller`] only
//! adjusts the attribute map on its way to and from storage.

use aws_sdk_dynamodb::types::AttributeValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_item};

use crate::error::{Error, Result};
use crate::Item;

/// Per-store marshalling toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarshallOptions {
    /// Store empty strings as `NULL` instead of rejecting them server-side.
    pub convert_empty_values: bool,
    /// Drop fields whose value is `NULL` (e.g. `Option::None`).
    pub remove_undefined_values: bool,
}

impl Default for MarshallOptions {
    fn default() -> Self {
        Self {
            convert_empty_values: false,
            remove_undefined_values: true,
        }
    }
}

/// Post-processes attribute maps produced and consumed by `serde_dynamo`.
pub trait Marshaller: Send + Sync {
    /// Called with a freshly serialized record, before it is written.
    fn encode(&self, item: Item) -> Result<Item>;

    /// Called with a stored item, before it is deserialized.
    fn decode(&self, item: Item) -> Result<Item> {
        Ok(item)
    }
}

/// Default [`Marshaller`] applying [`MarshallOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamoMarshaller {
    options: MarshallOptions,
}

impl DynamoMarshaller {
    pub fn new(options: MarshallOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> MarshallOptions {
        self.options
    }

    fn strip(&self, item: Item) -> Item {
        item.into_iter()
            .filter(|(_, value)| !(self.options.remove_undefined_values && value.is_null()))
            .map(|(name, value)| (name, self.convert(value)))
            .collect()
    }

    fn convert(&self, value: AttributeValue) -> AttributeValue {
        match value {
            AttributeValue::S(s) if s.is_empty() && self.options.convert_empty_values => {
                AttributeValue::Null(true)
            }
            AttributeValue::M(map) => AttributeValue::M(self.strip(map)),
            AttributeValue::L(values) => {
                AttributeValue::L(values.into_iter().map(|v| self.convert(v)).collect())
            }
            other => other,
        }
    }
}

impl Marshaller for DynamoMarshaller {
    fn encode(&self, item: Item) -> Result<Item> {
        Ok(self.strip(item))
    }
}

/// Serializes a record into an attribute map.
pub fn marshall<T: Serialize>(marshaller: &dyn Marshaller, record: &T) -> Result<Item> {
    let item: Item = to_item(record).map_err(|e| Error::Marshalling(e.to_string()))?;
    marshaller.encode(item)
}

/// Hydrates a record from an attribute map.
pub fn unmarshall<T: DeserializeOwned>(marshaller: &dyn Marshaller, item: &Item) -> Result<T> {
    let item = marshaller.decode(item.clone())?;
    from_item(item).map_err(|e| Error::Marshalling(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use aws_sdk_dynamodb::primitives::Blob;
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: String,
        nickname: Option<String>,
        bio: String,
        score: f64,
        visits: u32,
        tags: Vec<String>,
    }

    fn profile() -> Profile {
        Profile {
            id: "u1".to_string(),
            nickname: None,
            bio: String::new(),
            score: 2.5,
            visits: 7,
            tags: vec!["a".to_string()],
        }
    }

    /// Raw bytes, serialized as a binary attribute.
    #[derive(Debug, PartialEq)]
    struct Bytes(Vec<u8>);

    impl Serialize for Bytes {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            serializer.serialize_bytes(&self.0)
        }
    }

    impl<'de> Deserialize<'de> for Bytes {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
            struct BytesVisitor;

            impl<'de> Visitor<'de> for BytesVisitor {
                type Value = Bytes;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("bytes")
                }

                fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Bytes, E> {
                    Ok(Bytes(v.to_vec()))
                }

                fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Bytes, E> {
                    Ok(Bytes(v))
                }
            }

            deserializer.deserialize_byte_buf(BytesVisitor)
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Attachment {
        id: String,
        size: u64,
        payload: Bytes,
    }

    #[test]
    fn test_marshall_drops_undefined_fields_by_default() {
        let marshaller = DynamoMarshaller::default();
        let item = marshall(&marshaller, &profile()).unwrap();

        assert!(!item.contains_key("nickname"));
        assert_eq!(item.get("bio"), Some(&AttributeValue::S(String::new())));
        assert_eq!(item.get("visits"), Some(&AttributeValue::N("7".to_string())));
        assert_eq!(
            item.get("tags"),
            Some(&AttributeValue::L(vec![AttributeValue::S("a".to_string())]))
        );
    }

    #[test]
    fn test_marshall_keeps_nulls_and_converts_empty_strings() {
        let marshaller = DynamoMarshaller::new(MarshallOptions {
            convert_empty_values: true,
            remove_undefined_values: false,
        });
        let item = marshall(&marshaller, &profile()).unwrap();

        assert_eq!(item.get("nickname"), Some(&AttributeValue::Null(true)));
        assert_eq!(item.get("bio"), Some(&AttributeValue::Null(true)));
    }

    #[test]
    fn test_nested_maps_are_stripped() {
        let marshaller = DynamoMarshaller::default();
        let mut inner = Item::new();
        inner.insert("gone".to_string(), AttributeValue::Null(true));
        inner.insert("kept".to_string(), AttributeValue::Bool(true));
        let mut item = Item::new();
        item.insert("inner".to_string(), AttributeValue::M(inner));

        let encoded = marshaller.encode(item).unwrap();
        let AttributeValue::M(inner) = &encoded["inner"] else {
            panic!("expected a map");
        };
        assert_eq!(inner.len(), 1);
        assert!(inner.contains_key("kept"));
    }

    #[test]
    fn test_unmarshall_restores_record() {
        let marshaller = DynamoMarshaller::default();
        let item = marshall(&marshaller, &profile()).unwrap();

        let restored: Profile = unmarshall(&marshaller, &item).unwrap();
        assert_eq!(restored, profile());
    }

    #[test]
    fn test_binary_and_wide_numbers_round_trip() {
        let marshaller = DynamoMarshaller::default();
        let attachment = Attachment {
            id: "a1".to_string(),
            size: u64::MAX,
            payload: Bytes(vec![1, 2]),
        };

        let item = marshall(&marshaller, &attachment).unwrap();
        assert_eq!(item.get("payload"), Some(&AttributeValue::B(Blob::new(vec![1, 2]))));
        assert_eq!(
            item.get("size"),
            Some(&AttributeValue::N("18446744073709551615".to_string()))
        );

        let restored: Attachment = unmarshall(&marshaller, &item).unwrap();
        assert_eq!(restored, attachment);
    }

    #[test]
    fn test_stored_attributes_pass_through_unchanged() {
        let marshaller = DynamoMarshaller::default();
        let mut item = Item::new();
        item.insert(
            "n".to_string(),
            AttributeValue::N("123456789012345678901".to_string()),
        );
        item.insert("b".to_string(), AttributeValue::B(Blob::new(vec![1, 2])));
        item.insert(
            "tags".to_string(),
            AttributeValue::Ss(vec!["x".to_string(), "y".to_string()]),
        );
        item.insert(
            "sizes".to_string(),
            AttributeValue::Ns(vec!["1".to_string(), "2.50".to_string()]),
        );

        let decoded = marshaller.decode(item.clone()).unwrap();
        assert_eq!(marshaller.encode(decoded).unwrap(), item);
    }

    #[test]
    fn test_non_object_record_rejected() {
        let marshaller = DynamoMarshaller::default();
        let result = marshall(&marshaller, &vec![1, 2, 3]);
        assert!(matches!(result, Err(Error::Marshalling(_))));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let marshaller = DynamoMarshaller::default();
        let mut item = Item::new();
        item.insert("visits".to_string(), AttributeValue::N("twelve".to_string()));

        let result: Result<Profile> = unmarshall(&marshaller, &item);
        assert!(matches!(result, Err(Error::Marshalling(_))));
    }
}
