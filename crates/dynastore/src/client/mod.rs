//! Storage client contract and the shared client handle.
//!
//! The [`StorageClient`] trait is the only surface the store talks to. The
//! DynamoDB implementation lives in [`dynamodb`]; [`inmemory`] provides a
//! process-local implementation for tests.

mod dynamodb;
#[cfg(feature = "inmemory")]
mod inmemory;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;

use dynastore_core::{
    AttributeValue, ClientFault, CreateTableRequest, Error, Expression, Item, Result,
    TableDescription, UpdateTableRequest,
};

pub use dynamodb::DynamoDbClient;
#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryStorage;

/// Result of a single storage client call.
pub type ClientResult<T> = std::result::Result<T, ClientFault>;

#[derive(Debug, Clone, PartialEq)]
pub struct GetItemRequest {
    pub table_name: String,
    pub key: Item,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutItemRequest {
    pub table_name: String,
    pub item: Item,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteItemRequest {
    pub table_name: String,
    pub key: Item,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition: String,
    pub filter: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<i32>,
    pub consistent_read: bool,
    pub scan_index_forward: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub filter: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<i32>,
    pub consistent_read: bool,
}

/// One page of query or scan results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Continuation cursor; `None` on the last page.
    pub last_evaluated_key: Option<Item>,
}

/// Operations the store needs from a key/range table service.
///
/// Implementations must report missing tables with
/// [`dynastore_core::FaultKind::ResourceNotFound`] and failed write
/// conditions with [`dynastore_core::FaultKind::ConditionalCheckFailed`].
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn list_tables(&self) -> ClientResult<Vec<String>>;

    async fn describe_table(&self, table_name: &str) -> ClientResult<TableDescription>;

    async fn create_table(&self, request: &CreateTableRequest) -> ClientResult<TableDescription>;

    async fn update_table(&self, request: &UpdateTableRequest) -> ClientResult<()>;

    async fn update_time_to_live(&self, table_name: &str, attribute: &str) -> ClientResult<()>;

    async fn get_item(&self, request: &GetItemRequest) -> ClientResult<Option<Item>>;

    async fn put_item(&self, request: &PutItemRequest) -> ClientResult<()>;

    async fn delete_item(&self, request: &DeleteItemRequest) -> ClientResult<()>;

    async fn query(&self, request: &QueryRequest) -> ClientResult<Page>;

    async fn scan(&self, request: &ScanRequest) -> ClientResult<Page>;
}

type ClientFactory<C> = Box<dyn Fn() -> BoxFuture<'static, Result<C>> + Send + Sync>;

enum Slot<C> {
    Vacant,
    Ready(Arc<C>),
    Disposed,
}

/// A lazily constructed client shared by every call made through one store.
///
/// The client is built on first use. [`SharedClient::dispose`] releases it
/// and makes every later [`SharedClient::get`] fail with
/// [`Error::ClientDisposed`]; disposing twice is a no-op.
pub struct SharedClient<C> {
    slot: Mutex<Slot<C>>,
    factory: Option<ClientFactory<C>>,
}

impl<C: StorageClient + 'static> SharedClient<C> {
    /// Defers construction until the first call.
    pub fn lazy<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        Self {
            slot: Mutex::new(Slot::Vacant),
            factory: Some(Box::new(move || factory().boxed())),
        }
    }

    /// Wraps an already constructed client.
    pub fn ready(client: C) -> Self {
        Self {
            slot: Mutex::new(Slot::Ready(Arc::new(client))),
            factory: None,
        }
    }

    pub async fn get(&self) -> Result<Arc<C>> {
        let mut slot = self.slot.lock().await;
        if let Slot::Ready(client) = &*slot {
            return Ok(Arc::clone(client));
        }
        if matches!(*slot, Slot::Disposed) {
            return Err(Error::ClientDisposed);
        }

        let factory = self.factory.as_ref().ok_or(Error::ClientDisposed)?;
        let client = Arc::new(factory().await?);
        tracing::debug!("Storage client constructed");
        *slot = Slot::Ready(Arc::clone(&client));
        Ok(client)
    }

    /// Releases the client. Returns `false` if it was already disposed.
    pub async fn dispose(&self) -> bool {
        let mut slot = self.slot.lock().await;
        if matches!(*slot, Slot::Disposed) {
            return false;
        }
        *slot = Slot::Disposed;
        tracing::debug!("Storage client disposed");
        true
    }

    pub async fn is_disposed(&self) -> bool {
        matches!(*self.slot.lock().await, Slot::Disposed)
    }
}

impl<C> fmt::Debug for SharedClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClient")
            .field("lazy", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_lazy_client_built_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let shared = SharedClient::lazy(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(InMemoryStorage::new())
            }
        });

        assert_eq!(built.load(Ordering::SeqCst), 0);
        let first = shared.get().await.unwrap();
        let second = shared.get().await.unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let shared = SharedClient::ready(InMemoryStorage::new());

        assert!(shared.dispose().await);
        assert!(!shared.dispose().await);
        assert!(shared.is_disposed().await);
        assert!(matches!(shared.get().await, Err(Error::ClientDisposed)));
    }

    #[tokio::test]
    async fn test_dispose_before_first_use() {
        let shared = SharedClient::lazy(|| async { Ok(InMemoryStorage::new()) });

        assert!(shared.dispose().await);
        assert!(matches!(shared.get().await, Err(Error::ClientDisposed)));
    }
}
