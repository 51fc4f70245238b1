//! The table access wrapper.
//!
//! A [`Store`] owns one shared storage client, the configuration and the
//! marshaller. Its operations are split by concern:
//!
//! - [`tables`]: table lifecycle (list, describe, ensure, create, index
//!   reconciliation)
//! - [`write`]: version-guarded puts with self-healing table creation, deletes
//! - [`read`]: single-item gets and paginated query/scan reads

mod read;
mod tables;
mod write;

use std::fmt;
use std::sync::Arc;

use dynastore_core::{ClientFault, DynamoMarshaller, Error, Marshaller, Record, Result};

use crate::client::{DynamoDbClient, SharedClient, StorageClient};
use crate::config::StoreConfig;

pub use read::{GetOptions, QueryOptions, ScanOptions};
pub use tables::EnsureTableOptions;
pub use write::PutOptions;

/// Generic table access for any [`Record`] type.
pub struct Store<C = DynamoDbClient> {
    client: SharedClient<C>,
    config: StoreConfig,
    marshaller: Arc<dyn Marshaller>,
}

impl Store<DynamoDbClient> {
    /// Creates a store whose DynamoDB client is built on first use.
    pub fn from_config(config: StoreConfig) -> Self {
        let connect_config = config.clone();
        let client = SharedClient::lazy(move || {
            let config = connect_config.clone();
            async move { DynamoDbClient::connect(&config).await }
        });
        Self::build(client, config)
    }

    pub fn from_env() -> Self {
        Self::from_config(StoreConfig::from_env())
    }
}

impl<C: StorageClient + 'static> Store<C> {
    /// Creates a store over an already constructed client.
    pub fn with_client(client: C, config: StoreConfig) -> Self {
        Self::build(SharedClient::ready(client), config)
    }

    fn build(client: SharedClient<C>, config: StoreConfig) -> Self {
        let marshaller = Arc::new(DynamoMarshaller::new(config.marshall));
        Self {
            client,
            config,
            marshaller,
        }
    }

    /// Replaces the default marshaller.
    pub fn with_marshaller(mut self, marshaller: impl Marshaller + 'static) -> Self {
        self.marshaller = Arc::new(marshaller);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Full table name for a record type, prefix included.
    pub fn table_name<R: Record>(&self) -> String {
        self.config.table_name(&R::schema().table_name)
    }

    /// Releases the shared client. Every later call fails with
    /// [`Error::ClientDisposed`]. Returns `false` if already disposed.
    pub async fn dispose(&self) -> bool {
        self.client.dispose().await
    }

    async fn client(&self) -> Result<Arc<C>> {
        self.client.get().await
    }

    fn marshaller(&self) -> &dyn Marshaller {
        self.marshaller.as_ref()
    }

    /// Request/response dump, only in debug mode.
    fn dump(&self, stage: &str, operation: &str, state: &dyn fmt::Debug) {
        if self.config.debug {
            tracing::debug!(stage, operation, state = ?state, "Storage call");
        }
    }

    /// Converts a client fault into the caller-facing error.
    ///
    /// Missing resources become [`Error::TableNotFound`]; everything else is
    /// logged and passed through as [`Error::Infrastructure`].
    async fn surface(&self, client: &C, table_name: &str, fault: ClientFault) -> Error {
        if fault.is_resource_not_found() {
            if self.config.debug {
                match client.list_tables().await {
                    Ok(tables) => tracing::debug!(
                        table = %table_name,
                        existing = ?tables,
                        "Resource not found"
                    ),
                    Err(err) => tracing::debug!(error = %err, "Failed to list tables"),
                }
            }
            return Error::TableNotFound {
                table: table_name.to_string(),
            };
        }

        self.fail(Some(table_name), fault)
    }

    /// Logs a fault with its operation context and wraps it.
    fn fail(&self, table_name: Option<&str>, fault: ClientFault) -> Error {
        tracing::error!(
            table = table_name.unwrap_or("-"),
            operation = fault.operation,
            error = %fault,
            "Storage call failed"
        );
        Error::Infrastructure(fault)
    }
}

impl<C> fmt::Debug for Store<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("client", &self.client)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "inmemory"))]
pub(crate) mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use dynastore_core::{AttributeType, IndexConfig, TableSchema};

    use super::*;
    use crate::client::InMemoryStorage;

    pub(crate) fn test_config() -> StoreConfig {
        StoreConfig {
            table_prefix: None,
            settle_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            debug: true,
            marshall: Default::default(),
            endpoint_url: None,
            region: "us-east-1".to_string(),
        }
    }

    pub(crate) fn test_store() -> (Store<InMemoryStorage>, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        (
            Store::with_client(storage.clone(), test_config()),
            storage,
        )
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Widget {
        pub id: String,
        pub value: i64,
        pub version: i64,
    }

    impl Widget {
        pub fn new(id: &str, value: i64) -> Self {
            Self {
                id: id.to_string(),
                value,
                version: dynastore_core::UNSAVED_VERSION,
            }
        }
    }

    impl Record for Widget {
        fn schema() -> TableSchema {
            TableSchema::new("widgets", "id", AttributeType::String)
        }

        fn version(&self) -> Option<i64> {
            Some(self.version)
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Reading {
        pub sensor: String,
        pub at: i64,
        pub site: String,
        pub celsius: f64,
    }

    impl Record for Reading {
        fn schema() -> TableSchema {
            TableSchema::new("readings", "sensor", AttributeType::String)
                .with_sort_field("at", AttributeType::Number)
                .with_attribute("site", AttributeType::String)
                .with_global_index(IndexConfig::new("by_site", "site").with_sort_key("at"))
        }
    }

    #[tokio::test]
    async fn test_table_name_uses_prefix() {
        let storage = InMemoryStorage::new();
        let store = Store::with_client(storage, test_config().with_table_prefix("dev"));
        assert_eq!(store.table_name::<Widget>(), "dev.widgets");
    }

    #[tokio::test]
    async fn test_dispose_blocks_further_calls() {
        let (store, storage) = test_store();

        assert!(store.dispose().await);
        assert!(!store.dispose().await);

        let result = store.list_tables().await;
        assert!(matches!(result, Err(Error::ClientDisposed)));
        assert_eq!(storage.total_calls().await, 0);
    }
}
