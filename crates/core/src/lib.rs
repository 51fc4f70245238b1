//! Core types for dynastore.
//!
//! Item descriptors, key and expression building, index planning and the
//! error taxonomy. Nothing in this crate performs I/O.

use std::collections::HashMap;

pub mod error;
pub mod expression;
pub mod key;
pub mod marshal;
pub mod planning;
pub mod record;
pub mod schema;

pub use aws_sdk_dynamodb::types::AttributeValue;

pub use error::{ClientFault, Error, FaultKind, Result};
pub use expression::{Expression, Filter, IndexTarget, KeyFields, ReadExpressions};
pub use key::{ItemKey, KeyValue};
pub use marshal::{DynamoMarshaller, MarshallOptions, Marshaller};
pub use planning::{IndexPlan, IndexState, IndexStatus, TableDescription, TableStatus};
pub use record::{Record, VersionBump, UNSAVED_VERSION};
pub use schema::{
    AttributeType, BillingMode, CreateTableRequest, IndexConfig, IndexUpdate, KeyAttribute,
    ProjectionType, TableOptions, TableSchema, UpdateTableRequest,
};

/// An item in attribute-value wire format.
pub type Item = HashMap<String, AttributeValue>;
