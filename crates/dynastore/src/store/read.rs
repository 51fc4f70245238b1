//! Single-item reads and paginated query/scan reads.

use dynastore_core::expression::{build_query, build_scan};
use dynastore_core::marshal::unmarshall;
use dynastore_core::{
    Error, Filter, IndexTarget, Item, ItemKey, KeyFields, KeyValue, ReadExpressions, Record,
    Result,
};

use super::Store;
use crate::client::{
    ClientResult, GetItemRequest, Page, QueryRequest, ScanRequest, StorageClient,
};

/// Options for [`Store::get_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOptions {
    pub range: Option<KeyValue>,
    /// Fail with [`Error::ItemNotFound`] when absent (default: true)
    pub required: bool,
    pub consistent_read: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            range: None,
            required: true,
            consistent_read: false,
        }
    }
}

impl GetOptions {
    pub fn with_range(mut self, range: impl Into<KeyValue>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Return `None` instead of failing when the item is absent.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn consistent(mut self) -> Self {
        self.consistent_read = true;
        self
    }
}

/// Options for [`Store::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub range: Option<KeyValue>,
    pub index: Option<IndexTarget>,
    pub filter: Filter,
    /// Stop requesting pages once this many records are collected. The last
    /// page is not trimmed, so the result may exceed the limit.
    pub limit: Option<usize>,
    /// Per-page item count forwarded to the service.
    pub page_size: Option<i32>,
    pub consistent_read: bool,
    /// Ascending sort key order (default: true)
    pub scan_index_forward: bool,
    /// Return what was read so far instead of failing on a missing table.
    pub ignore_missing_table: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            range: None,
            index: None,
            filter: Filter::default(),
            limit: None,
            page_size: None,
            consistent_read: false,
            scan_index_forward: true,
            ignore_missing_table: false,
        }
    }
}

impl QueryOptions {
    pub fn with_range(mut self, range: impl Into<KeyValue>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn with_index(mut self, index: IndexTarget) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn descending(mut self) -> Self {
        self.scan_index_forward = false;
        self
    }

    pub fn ignore_missing_table(mut self) -> Self {
        self.ignore_missing_table = true;
        self
    }
}

/// Options for [`Store::scan`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    /// Identity value matched through the filter expression.
    pub id: Option<KeyValue>,
    pub range: Option<KeyValue>,
    pub index: Option<IndexTarget>,
    pub filter: Filter,
    pub limit: Option<usize>,
    pub page_size: Option<i32>,
    pub consistent_read: bool,
    pub ignore_missing_table: bool,
}

impl ScanOptions {
    pub fn with_id(mut self, id: impl Into<KeyValue>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_range(mut self, range: impl Into<KeyValue>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn with_index(mut self, index: IndexTarget) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn ignore_missing_table(mut self) -> Self {
        self.ignore_missing_table = true;
        self
    }
}

/// A page request whose start cursor advances between calls.
#[derive(Debug)]
enum PageRequest {
    Query(QueryRequest),
    Scan(ScanRequest),
}

impl PageRequest {
    fn operation(&self) -> &'static str {
        match self {
            PageRequest::Query(_) => "Query",
            PageRequest::Scan(_) => "Scan",
        }
    }

    fn start_after(&mut self, cursor: Item) {
        match self {
            PageRequest::Query(request) => request.exclusive_start_key = Some(cursor),
            PageRequest::Scan(request) => request.exclusive_start_key = Some(cursor),
        }
    }

    async fn send<C: StorageClient>(&self, client: &C) -> ClientResult<Page> {
        match self {
            PageRequest::Query(request) => client.query(request).await,
            PageRequest::Scan(request) => client.scan(request).await,
        }
    }
}

impl<C: StorageClient + 'static> Store<C> {
    /// Reads one item by key.
    ///
    /// An absent item is [`Error::ItemNotFound`] unless the options are
    /// [`GetOptions::optional`], in which case `None` is returned.
    pub async fn get_item<R: Record>(
        &self,
        id: impl Into<KeyValue>,
        options: GetOptions,
    ) -> Result<Option<R>> {
        let schema = R::schema();
        let table_name = self.config.table_name(&schema.table_name);
        let key = ItemKey::resolve(&schema, &id.into(), options.range.as_ref())?;

        let client = self.client().await?;
        let request = GetItemRequest {
            table_name: table_name.clone(),
            key: key.to_item(),
            consistent_read: options.consistent_read,
        };

        self.dump("before", "GetItem", &request);
        let found = match client.get_item(&request).await {
            Ok(found) => found,
            Err(fault) => return Err(self.surface(&client, &table_name, fault).await),
        };
        self.dump("after", "GetItem", &found);

        match found {
            Some(item) => Ok(Some(unmarshall(self.marshaller(), &item)?)),
            None if options.required => Err(Error::ItemNotFound {
                table: table_name,
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Reads every record under one identity value, page by page.
    pub async fn query<R: Record>(
        &self,
        id: impl Into<KeyValue>,
        options: QueryOptions,
    ) -> Result<Vec<R>> {
        let schema = R::schema();
        let table_name = self.config.table_name(&schema.table_name);
        check_consistency(options.index.as_ref(), options.consistent_read)?;

        let fields = KeyFields::resolve(&schema, options.index.as_ref());
        let ReadExpressions {
            key_condition,
            filter,
            names,
            values,
        } = build_query(fields, &id.into(), options.range.as_ref(), &options.filter)?;

        let request = PageRequest::Query(QueryRequest {
            table_name: table_name.clone(),
            index_name: options.index.map(|index| index.name),
            key_condition: key_condition.unwrap_or_default(),
            filter,
            names,
            values,
            exclusive_start_key: None,
            limit: options.page_size,
            consistent_read: options.consistent_read,
            scan_index_forward: options.scan_index_forward,
        });
        self.paginate(&table_name, request, options.limit, options.ignore_missing_table)
            .await
    }

    /// Reads the whole table (or index), optionally filtered.
    pub async fn scan<R: Record>(&self, options: ScanOptions) -> Result<Vec<R>> {
        let schema = R::schema();
        let table_name = self.config.table_name(&schema.table_name);
        check_consistency(options.index.as_ref(), options.consistent_read)?;

        let fields = KeyFields::resolve(&schema, options.index.as_ref());
        let built = build_scan(
            fields,
            options.id.as_ref(),
            options.range.as_ref(),
            &options.filter,
        )?;

        let request = PageRequest::Scan(ScanRequest {
            table_name: table_name.clone(),
            index_name: options.index.map(|index| index.name),
            filter: built.filter,
            names: built.names,
            values: built.values,
            exclusive_start_key: None,
            limit: options.page_size,
            consistent_read: options.consistent_read,
        });
        self.paginate(&table_name, request, options.limit, options.ignore_missing_table)
            .await
    }

    async fn paginate<R: Record>(
        &self,
        table_name: &str,
        mut request: PageRequest,
        limit: Option<usize>,
        ignore_missing_table: bool,
    ) -> Result<Vec<R>> {
        let client = self.client().await?;
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            self.dump("before", request.operation(), &request);
            let page = match request.send(client.as_ref()).await {
                Ok(page) => page,
                Err(fault) if fault.is_resource_not_found() && ignore_missing_table => {
                    tracing::debug!(table = %table_name, "Table missing, returning partial result");
                    return Ok(records);
                }
                Err(fault) => return Err(self.surface(&client, table_name, fault).await),
            };
            self.dump("after", request.operation(), &page);
            pages += 1;

            for item in &page.items {
                records.push(unmarshall(self.marshaller(), item)?);
            }

            let reached_limit = limit.is_some_and(|limit| records.len() >= limit);
            match page.last_evaluated_key {
                Some(cursor) if !reached_limit => request.start_after(cursor),
                _ => break,
            }
        }

        tracing::debug!(
            table = %table_name,
            operation = request.operation(),
            pages,
            count = records.len(),
            "Read complete"
        );
        Ok(records)
    }
}

/// Secondary indexes only support eventually consistent reads.
fn check_consistency(index: Option<&IndexTarget>, consistent_read: bool) -> Result<()> {
    match index {
        Some(index) if consistent_read => Err(Error::InvalidArgument(format!(
            "consistent reads are not supported on index '{}'",
            index.name
        ))),
        _ => Ok(()),
    }
}
