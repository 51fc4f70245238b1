//! In-memory storage client.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dynastore_core::{
    AttributeValue, BillingMode, ClientFault, CreateTableRequest, FaultKind, IndexConfig,
    IndexState, IndexStatus, IndexUpdate, Item, TableDescription, TableStatus,
    UpdateTableRequest,
};

use super::{
    ClientResult, DeleteItemRequest, GetItemRequest, Page, PutItemRequest, QueryRequest,
    ScanRequest, StorageClient,
};

const DEFAULT_PAGE_SIZE: usize = 100;

/// In-memory storage backend for testing.
///
/// Evaluates the expression subset the store generates: `AND`-joined
/// comparisons (`=`, `<>`, `<`, `<=`, `>`, `>=`), `attribute_exists`,
/// `attribute_not_exists` and `begins_with`, optionally parenthesized.
/// Every call is counted per operation name so tests can assert on the
/// traffic a store produced. Data is lost when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
    activation_polls: u32,
    page_size: usize,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    calls: HashMap<&'static str, usize>,
    faults: HashMap<&'static str, VecDeque<FaultKind>>,
}

#[derive(Debug)]
struct Table {
    partition_key: String,
    sort_key: Option<String>,
    status: TableStatus,
    polls_remaining: u32,
    local_indexes: Vec<IndexConfig>,
    global_indexes: Vec<IndexConfig>,
    time_to_live: Option<String>,
    billing_mode: BillingMode,
    items: BTreeMap<StorageKey, Item>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Creates an empty storage where new tables are active immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            activation_polls: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// New tables report `CREATING` for this many describe calls.
    pub fn with_activation_polls(mut self, polls: u32) -> Self {
        self.activation_polls = polls;
        self
    }

    /// Page size used when a read request carries no limit.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of calls made for one operation (e.g. `"PutItem"`).
    pub async fn calls(&self, operation: &str) -> usize {
        let state = self.state.read().await;
        state.calls.get(operation).copied().unwrap_or(0)
    }

    pub async fn total_calls(&self) -> usize {
        let state = self.state.read().await;
        state.calls.values().sum()
    }

    /// Makes the next call of `operation` fail with `kind`.
    pub async fn fail_next(&self, operation: &'static str, kind: FaultKind) {
        let mut state = self.state.write().await;
        state.faults.entry(operation).or_default().push_back(kind);
    }

    pub async fn item_count(&self, table_name: &str) -> usize {
        let state = self.state.read().await;
        state.tables.get(table_name).map_or(0, |t| t.items.len())
    }

    /// Attribute with time-to-live enabled, if any.
    pub async fn time_to_live(&self, table_name: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .tables
            .get(table_name)
            .and_then(|t| t.time_to_live.clone())
    }

    pub async fn local_index_names(&self, table_name: &str) -> Vec<String> {
        let state = self.state.read().await;
        state.tables.get(table_name).map_or_else(Vec::new, |t| {
            t.local_indexes.iter().map(|i| i.name.clone()).collect()
        })
    }
}

impl State {
    fn record(&mut self, operation: &'static str) -> ClientResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        match self.faults.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(kind) => Err(ClientFault::new(operation, kind, "injected fault")),
            None => Ok(()),
        }
    }

    fn table(&self, operation: &'static str, name: &str) -> ClientResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| table_not_found(operation, name))
    }

    fn table_mut(&mut self, operation: &'static str, name: &str) -> ClientResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| table_not_found(operation, name))
    }
}

impl Table {
    fn describe(&self, name: &str) -> TableDescription {
        TableDescription {
            table_name: name.to_string(),
            status: self.status,
            billing_mode: self.billing_mode,
            global_indexes: self
                .global_indexes
                .iter()
                .map(|index| IndexState {
                    name: index.name.clone(),
                    status: IndexStatus::Active,
                })
                .collect(),
        }
    }

    fn storage_key(&self, operation: &'static str, item: &Item) -> ClientResult<StorageKey> {
        let partition = item
            .get(&self.partition_key)
            .and_then(key_component)
            .ok_or_else(|| validation(operation, "missing partition key attribute"))?;
        let sort = match &self.sort_key {
            Some(name) => item
                .get(name)
                .and_then(key_component)
                .ok_or_else(|| validation(operation, "missing sort key attribute"))?,
            None => KeyPart::Absent,
        };
        Ok((partition, sort))
    }

    fn index(&self, operation: &'static str, name: &str) -> ClientResult<&IndexConfig> {
        self.global_indexes
            .iter()
            .chain(&self.local_indexes)
            .find(|index| index.name == name)
            .ok_or_else(|| validation(operation, format!("index '{name}' does not exist")))
    }

    /// Items visible through the table or an index, in key order.
    fn candidates(&self, index: Option<&IndexConfig>) -> Vec<&Item> {
        let Some(index) = index else {
            return self.items.values().collect();
        };

        let index_key = |item: &Item| -> Option<StorageKey> {
            let partition = item.get(&index.partition_key).and_then(key_component)?;
            let sort = match &index.sort_key {
                Some(name) => item.get(name).and_then(key_component)?,
                None => KeyPart::Absent,
            };
            Some((partition, sort))
        };

        let mut keyed: Vec<(StorageKey, &Item)> = self
            .items
            .values()
            .filter_map(|item| index_key(item).map(|key| (key, item)))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, item)| item).collect()
    }

    fn cursor_fields(&self, index: Option<&IndexConfig>) -> Vec<String> {
        let mut fields = vec![self.partition_key.clone()];
        fields.extend(self.sort_key.clone());
        if let Some(index) = index {
            fields.push(index.partition_key.clone());
            fields.extend(index.sort_key.clone());
        }
        fields.dedup();
        fields
    }
}

struct PageQuery<'a> {
    operation: &'static str,
    index_name: Option<&'a str>,
    key_condition: Option<&'a str>,
    filter: Option<&'a str>,
    names: &'a HashMap<String, String>,
    values: &'a HashMap<String, AttributeValue>,
    start: Option<&'a Item>,
    limit: Option<i32>,
    forward: bool,
}

impl InMemoryStorage {
    fn read_page(&self, table: &Table, query: PageQuery<'_>) -> ClientResult<Page> {
        let index = match query.index_name {
            Some(name) => Some(table.index(query.operation, name)?),
            None => None,
        };
        let context = Context {
            operation: query.operation,
            names: query.names,
            values: query.values,
        };

        let mut matching = Vec::new();
        for item in table.candidates(index) {
            let keep = match query.key_condition {
                Some(condition) => context.evaluate(condition, item)?,
                None => true,
            };
            if keep {
                matching.push(item);
            }
        }
        if !query.forward {
            matching.reverse();
        }

        let cursor_fields = table.cursor_fields(index);
        let offset = match query.start {
            Some(start) => matching
                .iter()
                .position(|item| {
                    cursor_fields
                        .iter()
                        .all(|field| item.get(field) == start.get(field))
                })
                .map_or(matching.len(), |position| position + 1),
            None => 0,
        };

        let page_size = query
            .limit
            .and_then(|limit| usize::try_from(limit).ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(self.page_size);
        let evaluated: Vec<&Item> = matching.iter().skip(offset).take(page_size).copied().collect();
        let has_more = offset + evaluated.len() < matching.len();

        let mut items = Vec::new();
        for item in &evaluated {
            let keep = match query.filter {
                Some(filter) => context.evaluate(filter, item)?,
                None => true,
            };
            if keep {
                items.push((*item).clone());
            }
        }

        let last_evaluated_key = match evaluated.last() {
            Some(last) if has_more => Some(
                cursor_fields
                    .iter()
                    .filter_map(|field| last.get(field).map(|v| (field.clone(), v.clone())))
                    .collect(),
            ),
            _ => None,
        };

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn list_tables(&self) -> ClientResult<Vec<String>> {
        let mut state = self.state.write().await;
        state.record("ListTables")?;
        Ok(state.tables.keys().cloned().collect())
    }

    async fn describe_table(&self, table_name: &str) -> ClientResult<TableDescription> {
        let mut state = self.state.write().await;
        state.record("DescribeTable")?;
        let table = state.table_mut("DescribeTable", table_name)?;

        if table.status == TableStatus::Creating {
            table.polls_remaining = table.polls_remaining.saturating_sub(1);
            if table.polls_remaining == 0 {
                table.status = TableStatus::Active;
            }
        }
        Ok(table.describe(table_name))
    }

    async fn create_table(&self, request: &CreateTableRequest) -> ClientResult<TableDescription> {
        let mut state = self.state.write().await;
        state.record("CreateTable")?;

        if state.tables.contains_key(&request.table_name) {
            return Err(validation(
                "CreateTable",
                format!("table '{}' already exists", request.table_name),
            ));
        }

        let status = if self.activation_polls > 0 {
            TableStatus::Creating
        } else {
            TableStatus::Active
        };
        let table = Table {
            partition_key: request.partition_key.name.clone(),
            sort_key: request.sort_key.as_ref().map(|sk| sk.name.clone()),
            status,
            polls_remaining: self.activation_polls,
            local_indexes: request.local_indexes.clone(),
            global_indexes: request.global_indexes.clone(),
            time_to_live: None,
            billing_mode: request.billing_mode,
            items: BTreeMap::new(),
        };
        let description = table.describe(&request.table_name);
        state.tables.insert(request.table_name.clone(), table);
        Ok(description)
    }

    async fn update_table(&self, request: &UpdateTableRequest) -> ClientResult<()> {
        let mut state = self.state.write().await;
        state.record("UpdateTable")?;
        let table = state.table_mut("UpdateTable", &request.table_name)?;

        match &request.index_update {
            IndexUpdate::Create(index) => {
                if table.global_indexes.iter().any(|i| i.name == index.name) {
                    return Err(validation(
                        "UpdateTable",
                        format!("index '{}' already exists", index.name),
                    ));
                }
                let provisioned = matches!(table.billing_mode, BillingMode::Provisioned { .. });
                if provisioned && request.billing_mode == BillingMode::PayPerRequest {
                    return Err(validation(
                        "UpdateTable",
                        format!("index '{}' needs provisioned throughput", index.name),
                    ));
                }
                table.global_indexes.push(index.clone());
            }
            IndexUpdate::Delete { index_name } => {
                let before = table.global_indexes.len();
                table.global_indexes.retain(|i| &i.name != index_name);
                if table.global_indexes.len() == before {
                    return Err(ClientFault::new(
                        "UpdateTable",
                        FaultKind::ResourceNotFound,
                        format!("index '{index_name}' not found"),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn update_time_to_live(&self, table_name: &str, attribute: &str) -> ClientResult<()> {
        let mut state = self.state.write().await;
        state.record("UpdateTimeToLive")?;
        let table = state.table_mut("UpdateTimeToLive", table_name)?;
        table.time_to_live = Some(attribute.to_string());
        Ok(())
    }

    async fn get_item(&self, request: &GetItemRequest) -> ClientResult<Option<Item>> {
        let mut state = self.state.write().await;
        state.record("GetItem")?;
        let table = state.table("GetItem", &request.table_name)?;
        let key = table.storage_key("GetItem", &request.key)?;
        Ok(table.items.get(&key).cloned())
    }

    async fn put_item(&self, request: &PutItemRequest) -> ClientResult<()> {
        let mut state = self.state.write().await;
        state.record("PutItem")?;
        let table = state.table_mut("PutItem", &request.table_name)?;
        let key = table.storage_key("PutItem", &request.item)?;

        if let Some(condition) = &request.condition {
            let empty = Item::new();
            let existing = table.items.get(&key).unwrap_or(&empty);
            let context = Context {
                operation: "PutItem",
                names: &condition.names,
                values: &condition.values,
            };
            if !context.evaluate(&condition.text, existing)? {
                return Err(ClientFault::new(
                    "PutItem",
                    FaultKind::ConditionalCheckFailed,
                    "The conditional request failed",
                ));
            }
        }

        table.items.insert(key, request.item.clone());
        Ok(())
    }

    async fn delete_item(&self, request: &DeleteItemRequest) -> ClientResult<()> {
        let mut state = self.state.write().await;
        state.record("DeleteItem")?;
        let table = state.table_mut("DeleteItem", &request.table_name)?;
        let key = table.storage_key("DeleteItem", &request.key)?;
        table.items.remove(&key);
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> ClientResult<Page> {
        let mut state = self.state.write().await;
        state.record("Query")?;
        let table = state.table("Query", &request.table_name)?;
        self.read_page(
            table,
            PageQuery {
                operation: "Query",
                index_name: request.index_name.as_deref(),
                key_condition: Some(&request.key_condition),
                filter: request.filter.as_deref(),
                names: &request.names,
                values: &request.values,
                start: request.exclusive_start_key.as_ref(),
                limit: request.limit,
                forward: request.scan_index_forward,
            },
        )
    }

    async fn scan(&self, request: &ScanRequest) -> ClientResult<Page> {
        let mut state = self.state.write().await;
        state.record("Scan")?;
        let table = state.table("Scan", &request.table_name)?;
        self.read_page(
            table,
            PageQuery {
                operation: "Scan",
                index_name: request.index_name.as_deref(),
                key_condition: None,
                filter: request.filter.as_deref(),
                names: &request.names,
                values: &request.values,
                start: request.exclusive_start_key.as_ref(),
                limit: request.limit,
                forward: true,
            },
        )
    }
}

// ============================================================================
// Expression evaluation
// ============================================================================

struct Context<'a> {
    operation: &'static str,
    names: &'a HashMap<String, String>,
    values: &'a HashMap<String, AttributeValue>,
}

impl Context<'_> {
    fn evaluate(&self, expression: &str, item: &Item) -> ClientResult<bool> {
        for clause in split_and(expression) {
            if !self.clause(clause.trim(), item)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn clause(&self, clause: &str, item: &Item) -> ClientResult<bool> {
        if let Some(inner) = strip_parens(clause) {
            return self.evaluate(inner, item);
        }
        if let Some(args) = function_args(clause, "attribute_not_exists") {
            return Ok(self.operand(args, item)?.is_none());
        }
        if let Some(args) = function_args(clause, "attribute_exists") {
            return Ok(self.operand(args, item)?.is_some());
        }
        if let Some(args) = function_args(clause, "begins_with") {
            let (path, prefix) = args
                .split_once(',')
                .ok_or_else(|| self.unsupported(clause))?;
            return Ok(
                match (self.operand(path.trim(), item)?, self.operand(prefix.trim(), item)?) {
                    (Some(AttributeValue::S(value)), Some(AttributeValue::S(prefix))) => {
                        value.starts_with(prefix.as_str())
                    }
                    _ => false,
                },
            );
        }

        let tokens: Vec<&str> = clause.split_whitespace().collect();
        let [lhs, op, rhs] = tokens.as_slice() else {
            return Err(self.unsupported(clause));
        };
        let (Some(left), Some(right)) = (self.operand(lhs, item)?, self.operand(rhs, item)?) else {
            return Ok(false);
        };
        let ordering = compare(left, right);
        Ok(match *op {
            "=" => left == right,
            "<>" => left != right,
            "<" => ordering == Some(Ordering::Less),
            "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            ">" => ordering == Some(Ordering::Greater),
            ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            _ => return Err(self.unsupported(clause)),
        })
    }

    fn operand<'i>(&'i self, token: &str, item: &'i Item) -> ClientResult<Option<&'i AttributeValue>> {
        if token.starts_with(':') {
            return self
                .values
                .get(token)
                .map(Some)
                .ok_or_else(|| validation(self.operation, format!("unbound value {token}")));
        }
        let name = if token.starts_with('#') {
            self.names
                .get(token)
                .ok_or_else(|| validation(self.operation, format!("unbound name {token}")))?
                .as_str()
        } else {
            token
        };
        Ok(item.get(name))
    }

    fn unsupported(&self, clause: &str) -> ClientFault {
        validation(self.operation, format!("unsupported expression '{clause}'"))
    }
}

fn split_and(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let bytes = expression.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b' ' if depth == 0 && expression[i..].starts_with(" AND ") => {
                parts.push(&expression[start..i]);
                i += " AND ".len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expression[start..]);
    parts
}

/// Returns the inside of a clause wrapped in one matching pair of parentheses.
fn strip_parens(clause: &str) -> Option<&str> {
    let inner = clause.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn function_args<'a>(clause: &'a str, function: &str) -> Option<&'a str> {
    clause
        .strip_prefix(function)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?)
        }
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => None,
    }
}

/// Partition and sort components of an item's primary or index key.
type StorageKey = (KeyPart, KeyPart);

/// A key attribute value, ordered the way the service orders keys:
/// numbers numerically, strings and binaries bytewise.
#[derive(Debug, Clone)]
enum KeyPart {
    Absent,
    N(f64),
    S(String),
    B(Vec<u8>),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Absent => 0,
            KeyPart::N(_) => 1,
            KeyPart::S(_) => 2,
            KeyPart::B(_) => 3,
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::N(a), KeyPart::N(b)) => a.total_cmp(b),
            (KeyPart::S(a), KeyPart::S(b)) => a.cmp(b),
            (KeyPart::B(a), KeyPart::B(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

fn key_component(value: &AttributeValue) -> Option<KeyPart> {
    match value {
        AttributeValue::S(s) => Some(KeyPart::S(s.clone())),
        AttributeValue::N(n) => n.parse().ok().map(KeyPart::N),
        AttributeValue::B(b) => Some(KeyPart::B(b.as_ref().to_vec())),
        _ => None,
    }
}

fn table_not_found(operation: &'static str, name: &str) -> ClientFault {
    ClientFault::new(
        operation,
        FaultKind::ResourceNotFound,
        format!("Requested resource not found: Table: {name} not found"),
    )
}

fn validation(operation: &'static str, message: impl Into<String>) -> ClientFault {
    ClientFault::new(operation, FaultKind::Other, message)
}

#[cfg(test)]
mod tests {
    use dynastore_core::{AttributeType, TableOptions, TableSchema};

    use super::*;

    fn s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    fn n(value: i64) -> AttributeValue {
        AttributeValue::N(value.to_string())
    }

    fn item(fields: &[(&str, AttributeValue)]) -> Item {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    async fn storage_with_table() -> InMemoryStorage {
        let storage = InMemoryStorage::new().with_page_size(2);
        let request = TableSchema::new("scores", "player", AttributeType::String)
            .with_sort_field("game", AttributeType::Number)
            .create_table_request("scores", TableOptions::default())
            .unwrap();
        storage.create_table(&request).await.unwrap();

        for game in 1..=5 {
            storage
                .put_item(&PutItemRequest {
                    table_name: "scores".to_string(),
                    item: item(&[("player", s("p1")), ("game", n(game)), ("points", n(game * 10))]),
                    condition: None,
                })
                .await
                .unwrap();
        }
        storage
    }

    fn query(start: Option<Item>) -> QueryRequest {
        let mut names = HashMap::new();
        names.insert("#id".to_string(), "player".to_string());
        let mut values = HashMap::new();
        values.insert(":idval".to_string(), s("p1"));
        QueryRequest {
            table_name: "scores".to_string(),
            index_name: None,
            key_condition: "#id = :idval".to_string(),
            filter: None,
            names,
            values,
            exclusive_start_key: start,
            limit: None,
            consistent_read: false,
            scan_index_forward: true,
        }
    }

    #[tokio::test]
    async fn test_query_pages_through_items() {
        let storage = storage_with_table().await;

        let first = storage.query(&query(None)).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.last_evaluated_key.is_some());

        let second = storage.query(&query(first.last_evaluated_key)).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[0].get("game"), Some(&n(3)));

        let third = storage.query(&query(second.last_evaluated_key)).await.unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.last_evaluated_key.is_none());
        assert_eq!(storage.calls("Query").await, 3);
    }

    #[tokio::test]
    async fn test_numeric_sort_keys_order_numerically() {
        let storage = storage_with_table().await;
        for game in [12, 10, 9, 11, 100, 6, 8, 7] {
            storage
                .put_item(&PutItemRequest {
                    table_name: "scores".to_string(),
                    item: item(&[("player", s("p1")), ("game", n(game))]),
                    condition: None,
                })
                .await
                .unwrap();
        }

        let mut games = Vec::new();
        let mut start = None;
        loop {
            let page = storage.query(&query(start)).await.unwrap();
            games.extend(page.items.iter().map(|item| item["game"].clone()));
            match page.last_evaluated_key {
                Some(cursor) => start = Some(cursor),
                None => break,
            }
        }
        let expected: Vec<AttributeValue> = (1..=12).chain([100]).map(n).collect();
        assert_eq!(games, expected);

        let mut request = query(None);
        request.scan_index_forward = false;
        let page = storage.query(&request).await.unwrap();
        assert_eq!(page.items[0]["game"], n(100));
        assert_eq!(page.items[1]["game"], n(12));
    }

    #[tokio::test]
    async fn test_filter_applies_after_page_limit() {
        let storage = storage_with_table().await;
        let mut request = query(None);
        request.filter = Some("(#points >= :min)".to_string());
        request.names.insert("#points".to_string(), "points".to_string());
        request.values.insert(":min".to_string(), n(20));

        let page = storage.query(&request).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.last_evaluated_key.is_some());
    }

    #[tokio::test]
    async fn test_conditional_put() {
        let storage = storage_with_table().await;
        let mut names = HashMap::new();
        names.insert("#version".to_string(), "version".to_string());
        let guarded = PutItemRequest {
            table_name: "scores".to_string(),
            item: item(&[("player", s("p2")), ("game", n(1)), ("version", n(0))]),
            condition: Some(dynastore_core::Expression {
                text: "attribute_not_exists(#version)".to_string(),
                names,
                values: HashMap::new(),
            }),
        };

        storage.put_item(&guarded).await.unwrap();
        let fault = storage.put_item(&guarded).await.unwrap_err();
        assert!(fault.is_conditional_check_failed());
    }

    #[tokio::test]
    async fn test_missing_table_is_resource_not_found() {
        let storage = InMemoryStorage::new();
        let fault = storage.describe_table("nope").await.unwrap_err();
        assert!(fault.is_resource_not_found());
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed() {
        let storage = InMemoryStorage::new();
        storage.fail_next("ListTables", FaultKind::Throttled).await;

        let fault = storage.list_tables().await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Throttled);
        assert!(storage.list_tables().await.is_ok());
        assert_eq!(storage.calls("ListTables").await, 2);
    }

    #[tokio::test]
    async fn test_activation_polls() {
        let storage = InMemoryStorage::new().with_activation_polls(2);
        let request = TableSchema::new("t", "id", AttributeType::String)
            .create_table_request("t", TableOptions::default())
            .unwrap();

        let created = storage.create_table(&request).await.unwrap();
        assert_eq!(created.status, TableStatus::Creating);
        assert_eq!(
            storage.describe_table("t").await.unwrap().status,
            TableStatus::Creating
        );
        assert_eq!(
            storage.describe_table("t").await.unwrap().status,
            TableStatus::Active
        );
    }

    #[test]
    fn test_split_and_respects_parentheses() {
        assert_eq!(
            split_and("#id = :idval AND (#a = :a AND #b = :b)"),
            vec!["#id = :idval", "(#a = :a AND #b = :b)"]
        );
        assert_eq!(strip_parens("(#a = :a) AND (#b = :b)"), None);
    }
}
