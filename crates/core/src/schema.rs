//! Item descriptor and table request types (pure data).
//!
//! A [`TableSchema`] declares everything needed to provision a table for one
//! record type: identity and sort keys, the attribute types of key and index
//! fields, secondary indexes and the optional expiry attribute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Attribute name used for the version counter unless a schema overrides it.
pub const DEFAULT_VERSION_FIELD: &str = "version";

/// Scalar attribute types usable in key schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    #[serde(alias = "S")]
    String,
    #[serde(alias = "N")]
    Number,
    #[serde(alias = "B")]
    Binary,
}

impl AttributeType {
    /// Short wire tag (`S`, `N` or `B`).
    pub fn tag(&self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::Binary => "B",
        }
    }
}

/// A key attribute definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
        }
    }
}

/// Index projection type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionType {
    #[default]
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// Secondary index definition. Key attribute types are resolved from the
/// owning schema's attribute type map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub partition_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub projection: ProjectionType,
}

impl IndexConfig {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            projection: ProjectionType::All,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_projection(mut self, projection: ProjectionType) -> Self {
        self.projection = projection;
        self
    }

    fn key_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }
}

/// Billing mode for the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    PayPerRequest,
    Provisioned {
        read_capacity: i64,
        write_capacity: i64,
    },
}

/// Provisioning options applied when a table is created from a schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub billing_mode: BillingMode,
    pub stream_enabled: bool,
}

/// Item descriptor for one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Base table name, before any configured prefix is applied.
    pub table_name: String,
    pub identity_field: String,
    #[serde(default)]
    pub sort_field: Option<String>,
    /// Types of key and index fields. Other attributes are inferred at write time.
    #[serde(default)]
    pub attribute_types: BTreeMap<String, AttributeType>,
    #[serde(default)]
    pub local_indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub global_indexes: Vec<IndexConfig>,
    /// Attribute holding a Unix-seconds expiry timestamp.
    #[serde(default)]
    pub expiry_field: Option<String>,
    #[serde(default = "default_version_field")]
    pub version_field: String,
}

fn default_version_field() -> String {
    DEFAULT_VERSION_FIELD.to_string()
}

impl TableSchema {
    /// Creates a schema keyed by `identity_field` only.
    pub fn new(
        table_name: impl Into<String>,
        identity_field: impl Into<String>,
        identity_type: AttributeType,
    ) -> Self {
        let identity_field = identity_field.into();
        let mut attribute_types = BTreeMap::new();
        attribute_types.insert(identity_field.clone(), identity_type);

        Self {
            table_name: table_name.into(),
            identity_field,
            sort_field: None,
            attribute_types,
            local_indexes: Vec::new(),
            global_indexes: Vec::new(),
            expiry_field: None,
            version_field: default_version_field(),
        }
    }

    pub fn with_sort_field(mut self, name: impl Into<String>, attribute_type: AttributeType) -> Self {
        let name = name.into();
        self.attribute_types.insert(name.clone(), attribute_type);
        self.sort_field = Some(name);
        self
    }

    /// Declares the type of an index key attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attribute_type: AttributeType) -> Self {
        self.attribute_types.insert(name.into(), attribute_type);
        self
    }

    pub fn with_local_index(mut self, index: IndexConfig) -> Self {
        self.local_indexes.push(index);
        self
    }

    pub fn with_global_index(mut self, index: IndexConfig) -> Self {
        self.global_indexes.push(index);
        self
    }

    pub fn with_expiry_field(mut self, name: impl Into<String>) -> Self {
        self.expiry_field = Some(name.into());
        self
    }

    pub fn with_version_field(mut self, name: impl Into<String>) -> Self {
        self.version_field = name.into();
        self
    }

    /// Looks up the declared type of `name`.
    pub fn attribute_type(&self, name: &str) -> Result<AttributeType> {
        self.attribute_types.get(name).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "table '{}' declares no attribute type for key field '{}'",
                self.table_name, name
            ))
        })
    }

    pub fn global_index(&self, name: &str) -> Option<&IndexConfig> {
        self.global_indexes.iter().find(|index| index.name == name)
    }

    /// Attribute definitions for the key fields of a single index.
    pub fn index_attribute_definitions(&self, index: &IndexConfig) -> Result<Vec<KeyAttribute>> {
        let mut definitions = Vec::new();
        for name in index.key_names() {
            push_definition(&mut definitions, name, self.attribute_type(name)?);
        }
        Ok(definitions)
    }

    /// Synthesizes the create-table request for this schema.
    pub fn create_table_request(
        &self,
        table_name: impl Into<String>,
        options: TableOptions,
    ) -> Result<CreateTableRequest> {
        let partition_key = KeyAttribute::new(
            &self.identity_field,
            self.attribute_type(&self.identity_field)?,
        );
        let sort_key = match &self.sort_field {
            Some(name) => Some(KeyAttribute::new(name, self.attribute_type(name)?)),
            None => None,
        };

        let mut attribute_definitions = vec![partition_key.clone()];
        if let Some(sk) = &sort_key {
            push_definition(&mut attribute_definitions, &sk.name, sk.attribute_type);
        }

        for index in self.local_indexes.iter().chain(&self.global_indexes) {
            for name in index.key_names() {
                push_definition(&mut attribute_definitions, name, self.attribute_type(name)?);
            }
        }

        let request = CreateTableRequest {
            table_name: table_name.into(),
            partition_key,
            sort_key,
            attribute_definitions,
            local_indexes: self.local_indexes.clone(),
            global_indexes: self.global_indexes.clone(),
            billing_mode: options.billing_mode,
            stream_enabled: options.stream_enabled,
        };
        request.validate()?;
        Ok(request)
    }
}

fn push_definition(definitions: &mut Vec<KeyAttribute>, name: &str, attribute_type: AttributeType) {
    if !definitions.iter().any(|a| a.name == name) {
        definitions.push(KeyAttribute::new(name, attribute_type));
    }
}

/// A fully resolved create-table request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableRequest {
    pub table_name: String,
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
    pub attribute_definitions: Vec<KeyAttribute>,
    pub local_indexes: Vec<IndexConfig>,
    pub global_indexes: Vec<IndexConfig>,
    pub billing_mode: BillingMode,
    pub stream_enabled: bool,
}

impl CreateTableRequest {
    /// Rejects requests the storage service would refuse as malformed.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(Error::Configuration(
                "create-table request has an empty table name".to_string(),
            ));
        }

        let defined = |name: &str| self.attribute_definitions.iter().any(|a| a.name == name);

        if !defined(&self.partition_key.name) {
            return Err(Error::Configuration(format!(
                "partition key '{}' has no attribute definition",
                self.partition_key.name
            )));
        }
        if let Some(sk) = &self.sort_key {
            if !defined(&sk.name) {
                return Err(Error::Configuration(format!(
                    "sort key '{}' has no attribute definition",
                    sk.name
                )));
            }
        }

        for index in self.local_indexes.iter().chain(&self.global_indexes) {
            if let Some(name) = index.key_names().find(|name| !defined(name)) {
                return Err(Error::Configuration(format!(
                    "index '{}' key '{}' has no attribute definition",
                    index.name, name
                )));
            }
        }

        for index in &self.local_indexes {
            if index.partition_key != self.partition_key.name {
                return Err(Error::Configuration(format!(
                    "local index '{}' must share the table partition key '{}'",
                    index.name, self.partition_key.name
                )));
            }
            if index.sort_key.is_none() {
                return Err(Error::Configuration(format!(
                    "local index '{}' requires a sort key",
                    index.name
                )));
            }
        }

        Ok(())
    }
}

/// A single index mutation. The storage service accepts one per update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    Create(IndexConfig),
    Delete { index_name: String },
}

/// An update-table request carrying exactly one index mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTableRequest {
    pub table_name: String,
    pub attribute_definitions: Vec<KeyAttribute>,
    /// Billing mode of the live table. A created index on a provisioned
    /// table is given the same throughput.
    pub billing_mode: BillingMode,
    pub index_update: IndexUpdate,
}
