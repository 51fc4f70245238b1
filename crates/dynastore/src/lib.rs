//! Generic table access over DynamoDB.
//!
//! Any serde type implementing [`Record`] can be stored through a [`Store`]:
//!
//! - **Tables**: idempotent creation with active-state polling, expiry and
//!   global index reconciliation
//! - **Writes**: optimistic concurrency on a version attribute, with optional
//!   self-healing table creation
//! - **Reads**: single-item gets and paginated query/scan reads
//!
//! The storage service is reached through the [`StorageClient`] trait. The
//! `inmemory` feature adds [`InMemoryStorage`] for tests.

pub mod client;
pub mod config;
pub mod store;

pub use client::{DynamoDbClient, SharedClient, StorageClient};
#[cfg(feature = "inmemory")]
pub use client::InMemoryStorage;
pub use config::StoreConfig;
pub use store::{EnsureTableOptions, GetOptions, PutOptions, QueryOptions, ScanOptions, Store};

pub use dynastore_core::{
    AttributeType, AttributeValue, BillingMode, Error, FaultKind, Filter, IndexConfig,
    IndexTarget, KeyValue, MarshallOptions, ProjectionType, Record, Result, TableOptions,
    TableSchema, UNSAVED_VERSION,
};
