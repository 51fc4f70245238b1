//! Key condition, filter and write-guard expression building.
//!
//! Attribute names are always referenced through `#` placeholders so user
//! field names never collide with reserved words of the expression grammar.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::{Error, Result};
use crate::key::KeyValue;
use crate::record::UNSAVED_VERSION;
use crate::schema::TableSchema;

pub const ID_NAME: &str = "#id";
pub const ID_VALUE: &str = ":idval";
pub const RANGE_NAME: &str = "#range";
pub const RANGE_VALUE: &str = ":rangeval";
pub const VERSION_NAME: &str = "#version";
pub const VERSION_VALUE: &str = ":version";

/// A secondary index read target.
///
/// When the override field names are absent the schema's identity and sort
/// field names are used in the built expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTarget {
    pub name: String,
    pub partition_field: Option<String>,
    pub sort_field: Option<String>,
}

impl IndexTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_partition_field(mut self, field: impl Into<String>) -> Self {
        self.partition_field = Some(field.into());
        self
    }

    pub fn with_sort_field(mut self, field: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self
    }
}

/// Caller-supplied filter expression and the extra placeholders it uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub expression: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

impl Filter {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn name(mut self, placeholder: impl Into<String>, field: impl Into<String>) -> Self {
        self.names.insert(placeholder.into(), field.into());
        self
    }

    pub fn value(mut self, placeholder: impl Into<String>, value: AttributeValue) -> Self {
        self.values.insert(placeholder.into(), value);
        self
    }
}

/// Field names the identity/range criteria are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFields<'a> {
    pub partition: &'a str,
    pub sort: Option<&'a str>,
}

impl<'a> KeyFields<'a> {
    pub fn resolve(schema: &'a TableSchema, index: Option<&'a IndexTarget>) -> Self {
        let partition = index
            .and_then(|i| i.partition_field.as_deref())
            .unwrap_or(schema.identity_field.as_str());
        let sort = index
            .and_then(|i| i.sort_field.as_deref())
            .or(schema.sort_field.as_deref());
        Self { partition, sort }
    }
}

/// Expressions and placeholder maps for one read request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadExpressions {
    pub key_condition: Option<String>,
    pub filter: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

/// A single expression with its placeholder maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub text: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

/// Builds a query: identity/range clauses form the key condition, the
/// caller's filter travels as a separate filter expression.
pub fn build_query(
    fields: KeyFields<'_>,
    identity: &KeyValue,
    range: Option<&KeyValue>,
    filter: &Filter,
) -> Result<ReadExpressions> {
    let mut out = ReadExpressions::default();
    let clauses = key_clauses(fields, Some(identity), range, &mut out)?;
    out.key_condition = Some(clauses.join(" AND "));
    out.filter = filter.expression.clone();
    merge_filter(filter, &mut out)?;
    Ok(out)
}

/// Builds a full-table read: identity/range clauses become filter clauses
/// AND-joined with the caller's filter.
pub fn build_scan(
    fields: KeyFields<'_>,
    identity: Option<&KeyValue>,
    range: Option<&KeyValue>,
    filter: &Filter,
) -> Result<ReadExpressions> {
    let mut out = ReadExpressions::default();
    let mut clauses = key_clauses(fields, identity, range, &mut out)?;
    if let Some(extra) = &filter.expression {
        if clauses.is_empty() {
            clauses.push(extra.clone());
        } else {
            clauses.push(format!("({extra})"));
        }
    }
    if !clauses.is_empty() {
        out.filter = Some(clauses.join(" AND "));
    }
    merge_filter(filter, &mut out)?;
    Ok(out)
}

/// The conditional guard for a versioned write.
///
/// A record still at the unsaved sentinel can only be checked for absence of
/// the version attribute; otherwise the stored version must equal `expected`.
pub fn version_guard(version_field: &str, expected: i64) -> Expression {
    let mut names = HashMap::new();
    names.insert(VERSION_NAME.to_string(), version_field.to_string());

    if expected == UNSAVED_VERSION {
        return Expression {
            text: format!("attribute_not_exists({VERSION_NAME})"),
            names,
            values: HashMap::new(),
        };
    }

    let mut values = HashMap::new();
    values.insert(
        VERSION_VALUE.to_string(),
        AttributeValue::N(expected.to_string()),
    );
    Expression {
        text: format!("{VERSION_NAME} = {VERSION_VALUE}"),
        names,
        values,
    }
}

fn key_clauses(
    fields: KeyFields<'_>,
    identity: Option<&KeyValue>,
    range: Option<&KeyValue>,
    out: &mut ReadExpressions,
) -> Result<Vec<String>> {
    let mut clauses = Vec::new();

    if let Some(identity) = identity {
        if identity.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "empty value for key field '{}'",
                fields.partition
            )));
        }
        out.names
            .insert(ID_NAME.to_string(), fields.partition.to_string());
        out.values
            .insert(ID_VALUE.to_string(), identity.to_attribute_value());
        clauses.push(format!("{ID_NAME} = {ID_VALUE}"));
    }

    if let Some(range) = range {
        let Some(sort) = fields.sort else {
            return Err(Error::Configuration(
                "range value supplied without a resolvable range field".to_string(),
            ));
        };
        if range.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "empty value for key field '{sort}'"
            )));
        }
        out.names.insert(RANGE_NAME.to_string(), sort.to_string());
        out.values
            .insert(RANGE_VALUE.to_string(), range.to_attribute_value());
        clauses.push(format!("{RANGE_NAME} = {RANGE_VALUE}"));
    }

    Ok(clauses)
}

fn merge_filter(filter: &Filter, out: &mut ReadExpressions) -> Result<()> {
    for (placeholder, field) in &filter.names {
        match out.names.get(placeholder) {
            Some(existing) if existing != field => {
                return Err(Error::Configuration(format!(
                    "placeholder '{placeholder}' already bound to '{existing}'"
                )));
            }
            _ => {
                out.names.insert(placeholder.clone(), field.clone());
            }
        }
    }
    for (placeholder, value) in &filter.values {
        match out.values.get(placeholder) {
            Some(existing) if existing != value => {
                return Err(Error::Configuration(format!(
                    "placeholder '{placeholder}' already bound to another value"
                )));
            }
            _ => {
                out.values.insert(placeholder.clone(), value.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeType;

    fn scores_schema() -> TableSchema {
        TableSchema::new("scores", "player", AttributeType::String)
            .with_sort_field("game", AttributeType::String)
    }

    #[test]
    fn test_query_with_identity_and_range() {
        let schema = scores_schema();
        let built = build_query(
            KeyFields::resolve(&schema, None),
            &"p1".into(),
            Some(&"chess".into()),
            &Filter::default(),
        )
        .unwrap();

        assert_eq!(
            built.key_condition.as_deref(),
            Some("#id = :idval AND #range = :rangeval")
        );
        assert_eq!(built.filter, None);
        assert_eq!(built.names.get("#id").map(String::as_str), Some("player"));
        assert_eq!(built.names.get("#range").map(String::as_str), Some("game"));
        assert_eq!(
            built.values.get(":rangeval"),
            Some(&AttributeValue::S("chess".to_string()))
        );
    }

    #[test]
    fn test_query_keeps_caller_filter_separate() {
        let schema = scores_schema();
        let filter = Filter::new("#points > :min")
            .name("#points", "points")
            .value(":min", AttributeValue::N("10".to_string()));

        let built = build_query(KeyFields::resolve(&schema, None), &"p1".into(), None, &filter)
            .unwrap();

        assert_eq!(built.key_condition.as_deref(), Some("#id = :idval"));
        assert_eq!(built.filter.as_deref(), Some("#points > :min"));
        assert_eq!(built.names.len(), 2);
        assert_eq!(built.values.len(), 2);
    }

    #[test]
    fn test_scan_joins_key_clauses_with_filter() {
        let schema = scores_schema();
        let filter = Filter::new("#points > :min")
            .name("#points", "points")
            .value(":min", AttributeValue::N("10".to_string()));

        let built = build_scan(
            KeyFields::resolve(&schema, None),
            Some(&"p1".into()),
            None,
            &filter,
        )
        .unwrap();

        assert_eq!(built.key_condition, None);
        assert_eq!(
            built.filter.as_deref(),
            Some("#id = :idval AND (#points > :min)")
        );
    }

    #[test]
    fn test_scan_without_criteria_has_no_filter() {
        let schema = scores_schema();
        let built = build_scan(
            KeyFields::resolve(&schema, None),
            None,
            None,
            &Filter::default(),
        )
        .unwrap();
        assert_eq!(built, ReadExpressions::default());
    }

    #[test]
    fn test_index_override_fields() {
        let schema = scores_schema();
        let index = IndexTarget::new("by_team")
            .with_partition_field("team")
            .with_sort_field("points");

        let fields = KeyFields::resolve(&schema, Some(&index));
        assert_eq!(fields.partition, "team");
        assert_eq!(fields.sort, Some("points"));

        let defaulted = IndexTarget::new("by_player");
        let fields = KeyFields::resolve(&schema, Some(&defaulted));
        assert_eq!(fields.partition, "player");
        assert_eq!(fields.sort, Some("game"));
    }

    #[test]
    fn test_range_without_field_is_configuration_error() {
        let schema = TableSchema::new("users", "id", AttributeType::String);
        let result = build_query(
            KeyFields::resolve(&schema, None),
            &"a1".into(),
            Some(&"x".into()),
            &Filter::default(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_empty_values_rejected() {
        let schema = scores_schema();
        let fields = KeyFields::resolve(&schema, None);

        let empty_id = build_query(fields, &"".into(), None, &Filter::default());
        assert!(matches!(empty_id, Err(Error::InvalidArgument(_))));

        let empty_range = build_scan(fields, None, Some(&"".into()), &Filter::default());
        assert!(matches!(empty_range, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_conflicting_placeholder_rejected() {
        let schema = scores_schema();
        let filter = Filter::new("#id <> :other").name("#id", "something_else");

        let result = build_query(
            KeyFields::resolve(&schema, None),
            &"p1".into(),
            None,
            &filter,
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_version_guard() {
        let creation = version_guard("version", UNSAVED_VERSION);
        assert_eq!(creation.text, "attribute_not_exists(#version)");
        assert!(creation.values.is_empty());

        let update = version_guard("rev", 3);
        assert_eq!(update.text, "#version = :version");
        assert_eq!(update.names.get("#version").map(String::as_str), Some("rev"));
        assert_eq!(
            update.values.get(":version"),
            Some(&AttributeValue::N("3".to_string()))
        );
    }
}
