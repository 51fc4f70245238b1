//! `aws-sdk-dynamodb` implementation of [`StorageClient`] (Imperative Shell).

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{BuildError, DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemError;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::operation::get_item::GetItemError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::scan::ScanError;
use aws_sdk_dynamodb::operation::update_table::UpdateTableError;
use aws_sdk_dynamodb::operation::update_time_to_live::UpdateTimeToLiveError;
use aws_sdk_dynamodb::types as ddb;
use aws_sdk_dynamodb::Client;

use dynastore_core::{
    AttributeType, BillingMode, ClientFault, CreateTableRequest, FaultKind, IndexConfig,
    IndexState, IndexStatus, IndexUpdate, Item, KeyAttribute, ProjectionType, Result,
    TableDescription, TableStatus, UpdateTableRequest,
};

use super::{
    ClientResult, DeleteItemRequest, GetItemRequest, Page, PutItemRequest, QueryRequest,
    ScanRequest, StorageClient,
};
use crate::config::StoreConfig;

/// DynamoDB-backed storage client.
#[derive(Debug, Clone)]
pub struct DynamoDbClient {
    inner: Client,
}

impl DynamoDbClient {
    pub fn new(inner: Client) -> Self {
        Self { inner }
    }

    /// Creates a DynamoDB client with the given configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut sdk_config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint_url {
            sdk_config_loader = sdk_config_loader.endpoint_url(endpoint);
        }

        let sdk_config = sdk_config_loader.load().await;
        Ok(Self::new(Client::new(&sdk_config)))
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

#[async_trait]
impl StorageClient for DynamoDbClient {
    async fn list_tables(&self) -> ClientResult<Vec<String>> {
        let mut names = Vec::new();
        let mut start: Option<String> = None;

        loop {
            let response = self
                .inner
                .list_tables()
                .set_exclusive_start_table_name(start.take())
                .send()
                .await
                .map_err(|e| map_sdk_error("ListTables", e, |_| FaultKind::Other))?;

            names.extend(response.table_names().iter().cloned());

            match response.last_evaluated_table_name() {
                Some(last) => start = Some(last.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn describe_table(&self, table_name: &str) -> ClientResult<TableDescription> {
        let response = self
            .inner
            .describe_table()
            .table_name(table_name)
            .send()
            .await
            .map_err(|e| map_sdk_error("DescribeTable", e, classify_describe_table))?;

        response.table().map(to_description).ok_or_else(|| {
            ClientFault::new(
                "DescribeTable",
                FaultKind::Other,
                format!("response for '{table_name}' carried no table description"),
            )
        })
    }

    async fn create_table(&self, request: &CreateTableRequest) -> ClientResult<TableDescription> {
        const OP: &str = "CreateTable";

        let mut key_schema = vec![key_element(OP, &request.partition_key.name, ddb::KeyType::Hash)?];
        if let Some(sk) = &request.sort_key {
            key_schema.push(key_element(OP, &sk.name, ddb::KeyType::Range)?);
        }

        let mut builder = self
            .inner
            .create_table()
            .table_name(&request.table_name)
            .set_key_schema(Some(key_schema))
            .set_attribute_definitions(Some(attribute_definitions(
                OP,
                &request.attribute_definitions,
            )?));

        builder = match request.billing_mode {
            BillingMode::PayPerRequest => builder.billing_mode(ddb::BillingMode::PayPerRequest),
            BillingMode::Provisioned {
                read_capacity,
                write_capacity,
            } => builder
                .billing_mode(ddb::BillingMode::Provisioned)
                .provisioned_throughput(throughput(OP, read_capacity, write_capacity)?),
        };

        if request.stream_enabled {
            builder = builder.stream_specification(
                ddb::StreamSpecification::builder()
                    .stream_enabled(true)
                    .stream_view_type(ddb::StreamViewType::NewAndOldImages)
                    .build()
                    .map_err(build_error(OP))?,
            );
        }

        for index in &request.local_indexes {
            builder = builder.local_secondary_indexes(
                ddb::LocalSecondaryIndex::builder()
                    .index_name(&index.name)
                    .set_key_schema(Some(index_key_schema(OP, index)?))
                    .projection(projection(&index.projection))
                    .build()
                    .map_err(build_error(OP))?,
            );
        }

        for index in &request.global_indexes {
            let mut gsi = ddb::GlobalSecondaryIndex::builder()
                .index_name(&index.name)
                .set_key_schema(Some(index_key_schema(OP, index)?))
                .projection(projection(&index.projection));
            if let BillingMode::Provisioned {
                read_capacity,
                write_capacity,
            } = request.billing_mode
            {
                gsi = gsi.provisioned_throughput(throughput(OP, read_capacity, write_capacity)?);
            }
            builder = builder.global_secondary_indexes(gsi.build().map_err(build_error(OP))?);
        }

        let output = builder
            .send()
            .await
            .map_err(|e| map_sdk_error(OP, e, classify_create_table))?;

        Ok(match output.table_description() {
            Some(table) => to_description(table),
            None => TableDescription {
                table_name: request.table_name.clone(),
                status: TableStatus::Creating,
                billing_mode: request.billing_mode,
                global_indexes: request
                    .global_indexes
                    .iter()
                    .map(|index| IndexState {
                        name: index.name.clone(),
                        status: IndexStatus::Creating,
                    })
                    .collect(),
            },
        })
    }

    async fn update_table(&self, request: &UpdateTableRequest) -> ClientResult<()> {
        const OP: &str = "UpdateTable";

        let update = match &request.index_update {
            IndexUpdate::Create(index) => {
                let mut action = ddb::CreateGlobalSecondaryIndexAction::builder()
                    .index_name(&index.name)
                    .set_key_schema(Some(index_key_schema(OP, index)?))
                    .projection(projection(&index.projection));
                if let BillingMode::Provisioned {
                    read_capacity,
                    write_capacity,
                } = request.billing_mode
                {
                    action =
                        action.provisioned_throughput(throughput(OP, read_capacity, write_capacity)?);
                }
                ddb::GlobalSecondaryIndexUpdate::builder()
                    .create(action.build().map_err(build_error(OP))?)
                    .build()
            }
            IndexUpdate::Delete { index_name } => ddb::GlobalSecondaryIndexUpdate::builder()
                .delete(
                    ddb::DeleteGlobalSecondaryIndexAction::builder()
                        .index_name(index_name)
                        .build()
                        .map_err(build_error(OP))?,
                )
                .build(),
        };

        let definitions = if request.attribute_definitions.is_empty() {
            None
        } else {
            Some(attribute_definitions(OP, &request.attribute_definitions)?)
        };

        self.inner
            .update_table()
            .table_name(&request.table_name)
            .set_attribute_definitions(definitions)
            .global_secondary_index_updates(update)
            .send()
            .await
            .map_err(|e| map_sdk_error(OP, e, classify_update_table))?;

        Ok(())
    }

    async fn update_time_to_live(&self, table_name: &str, attribute: &str) -> ClientResult<()> {
        const OP: &str = "UpdateTimeToLive";

        let specification = ddb::TimeToLiveSpecification::builder()
            .enabled(true)
            .attribute_name(attribute)
            .build()
            .map_err(build_error(OP))?;

        self.inner
            .update_time_to_live()
            .table_name(table_name)
            .time_to_live_specification(specification)
            .send()
            .await
            .map_err(|e| map_sdk_error(OP, e, classify_update_time_to_live))?;

        Ok(())
    }

    async fn get_item(&self, request: &GetItemRequest) -> ClientResult<Option<Item>> {
        let result = self
            .inner
            .get_item()
            .table_name(&request.table_name)
            .set_key(Some(request.key.clone()))
            .consistent_read(request.consistent_read)
            .send()
            .await
            .map_err(|e| map_sdk_error("GetItem", e, classify_get_item))?;

        Ok(result.item)
    }

    async fn put_item(&self, request: &PutItemRequest) -> ClientResult<()> {
        let mut builder = self
            .inner
            .put_item()
            .table_name(&request.table_name)
            .set_item(Some(request.item.clone()));

        if let Some(condition) = &request.condition {
            builder = builder
                .condition_expression(&condition.text)
                .set_expression_attribute_names(non_empty(&condition.names))
                .set_expression_attribute_values(non_empty(&condition.values));
        }

        builder
            .send()
            .await
            .map_err(|e| map_sdk_error("PutItem", e, classify_put_item))?;

        Ok(())
    }

    async fn delete_item(&self, request: &DeleteItemRequest) -> ClientResult<()> {
        self.inner
            .delete_item()
            .table_name(&request.table_name)
            .set_key(Some(request.key.clone()))
            .send()
            .await
            .map_err(|e| map_sdk_error("DeleteItem", e, classify_delete_item))?;

        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> ClientResult<Page> {
        let result = self
            .inner
            .query()
            .table_name(&request.table_name)
            .set_index_name(request.index_name.clone())
            .key_condition_expression(&request.key_condition)
            .set_filter_expression(request.filter.clone())
            .set_expression_attribute_names(non_empty(&request.names))
            .set_expression_attribute_values(non_empty(&request.values))
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .set_limit(request.limit)
            .consistent_read(request.consistent_read)
            .scan_index_forward(request.scan_index_forward)
            .send()
            .await
            .map_err(|e| map_sdk_error("Query", e, classify_query))?;

        Ok(Page {
            items: result.items.unwrap_or_default(),
            last_evaluated_key: result.last_evaluated_key,
        })
    }

    async fn scan(&self, request: &ScanRequest) -> ClientResult<Page> {
        let result = self
            .inner
            .scan()
            .table_name(&request.table_name)
            .set_index_name(request.index_name.clone())
            .set_filter_expression(request.filter.clone())
            .set_expression_attribute_names(non_empty(&request.names))
            .set_expression_attribute_values(non_empty(&request.values))
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .set_limit(request.limit)
            .consistent_read(request.consistent_read)
            .send()
            .await
            .map_err(|e| map_sdk_error("Scan", e, classify_scan))?;

        Ok(Page {
            items: result.items.unwrap_or_default(),
            last_evaluated_key: result.last_evaluated_key,
        })
    }
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map an SDK error to a [`ClientFault`], keeping the SDK error as source.
fn map_sdk_error<E, R>(
    operation: &'static str,
    err: SdkError<E, R>,
    classify: fn(&E) -> FaultKind,
) -> ClientFault
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let kind = err.as_service_error().map(classify).unwrap_or(FaultKind::Other);
    let message = DisplayErrorContext(&err).to_string();
    ClientFault::new(operation, kind, message).with_source(err)
}

fn build_error(operation: &'static str) -> impl Fn(BuildError) -> ClientFault {
    move |err| ClientFault::new(operation, FaultKind::Other, err.to_string()).with_source(err)
}

fn classify_describe_table(err: &DescribeTableError) -> FaultKind {
    match err {
        DescribeTableError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        _ => FaultKind::Other,
    }
}

fn classify_create_table(err: &CreateTableError) -> FaultKind {
    match err {
        CreateTableError::LimitExceededException(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_update_table(err: &UpdateTableError) -> FaultKind {
    match err {
        UpdateTableError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        UpdateTableError::LimitExceededException(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_update_time_to_live(err: &UpdateTimeToLiveError) -> FaultKind {
    match err {
        UpdateTimeToLiveError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        UpdateTimeToLiveError::LimitExceededException(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_get_item(err: &GetItemError) -> FaultKind {
    match err {
        GetItemError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        GetItemError::ProvisionedThroughputExceededException(_)
        | GetItemError::RequestLimitExceeded(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_put_item(err: &PutItemError) -> FaultKind {
    match err {
        PutItemError::ConditionalCheckFailedException(_) => FaultKind::ConditionalCheckFailed,
        PutItemError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        PutItemError::ProvisionedThroughputExceededException(_)
        | PutItemError::RequestLimitExceeded(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_delete_item(err: &DeleteItemError) -> FaultKind {
    match err {
        DeleteItemError::ConditionalCheckFailedException(_) => FaultKind::ConditionalCheckFailed,
        DeleteItemError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        DeleteItemError::ProvisionedThroughputExceededException(_)
        | DeleteItemError::RequestLimitExceeded(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_query(err: &QueryError) -> FaultKind {
    match err {
        QueryError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        QueryError::ProvisionedThroughputExceededException(_)
        | QueryError::RequestLimitExceeded(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

fn classify_scan(err: &ScanError) -> FaultKind {
    match err {
        ScanError::ResourceNotFoundException(_) => FaultKind::ResourceNotFound,
        ScanError::ProvisionedThroughputExceededException(_)
        | ScanError::RequestLimitExceeded(_) => FaultKind::Throttled,
        _ => FaultKind::Other,
    }
}

// ============================================================================
// Request building
// ============================================================================

fn key_element(
    operation: &'static str,
    name: &str,
    key_type: ddb::KeyType,
) -> ClientResult<ddb::KeySchemaElement> {
    ddb::KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(build_error(operation))
}

fn index_key_schema(
    operation: &'static str,
    index: &IndexConfig,
) -> ClientResult<Vec<ddb::KeySchemaElement>> {
    let mut key_schema = vec![key_element(operation, &index.partition_key, ddb::KeyType::Hash)?];
    if let Some(sk) = &index.sort_key {
        key_schema.push(key_element(operation, sk, ddb::KeyType::Range)?);
    }
    Ok(key_schema)
}

fn attribute_definitions(
    operation: &'static str,
    definitions: &[KeyAttribute],
) -> ClientResult<Vec<ddb::AttributeDefinition>> {
    definitions
        .iter()
        .map(|attribute| {
            ddb::AttributeDefinition::builder()
                .attribute_name(&attribute.name)
                .attribute_type(to_scalar_type(attribute.attribute_type))
                .build()
                .map_err(build_error(operation))
        })
        .collect()
}

fn throughput(
    operation: &'static str,
    read_capacity: i64,
    write_capacity: i64,
) -> ClientResult<ddb::ProvisionedThroughput> {
    ddb::ProvisionedThroughput::builder()
        .read_capacity_units(read_capacity)
        .write_capacity_units(write_capacity)
        .build()
        .map_err(build_error(operation))
}

fn projection(projection: &ProjectionType) -> ddb::Projection {
    match projection {
        ProjectionType::All => ddb::Projection::builder()
            .projection_type(ddb::ProjectionType::All)
            .build(),
        ProjectionType::KeysOnly => ddb::Projection::builder()
            .projection_type(ddb::ProjectionType::KeysOnly)
            .build(),
        ProjectionType::Include(attributes) => ddb::Projection::builder()
            .projection_type(ddb::ProjectionType::Include)
            .set_non_key_attributes(Some(attributes.clone()))
            .build(),
    }
}

fn to_scalar_type(attribute_type: AttributeType) -> ddb::ScalarAttributeType {
    match attribute_type {
        AttributeType::String => ddb::ScalarAttributeType::S,
        AttributeType::Number => ddb::ScalarAttributeType::N,
        AttributeType::Binary => ddb::ScalarAttributeType::B,
    }
}

fn non_empty<V: Clone>(map: &HashMap<String, V>) -> Option<HashMap<String, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn to_description(table: &ddb::TableDescription) -> TableDescription {
    let global_indexes = table
        .global_secondary_indexes()
        .iter()
        .map(|gsi| IndexState {
            name: gsi.index_name().unwrap_or_default().to_string(),
            status: match gsi.index_status() {
                Some(ddb::IndexStatus::Active) => IndexStatus::Active,
                Some(ddb::IndexStatus::Creating) => IndexStatus::Creating,
                Some(ddb::IndexStatus::Updating) => IndexStatus::Updating,
                Some(ddb::IndexStatus::Deleting) => IndexStatus::Deleting,
                _ => IndexStatus::Active,
            },
        })
        .collect();

    let status = match table.table_status() {
        Some(ddb::TableStatus::Active) => TableStatus::Active,
        Some(ddb::TableStatus::Creating) => TableStatus::Creating,
        Some(ddb::TableStatus::Updating) => TableStatus::Updating,
        Some(ddb::TableStatus::Deleting) => TableStatus::Deleting,
        _ => TableStatus::Other,
    };

    TableDescription {
        table_name: table.table_name().unwrap_or_default().to_string(),
        status,
        billing_mode: billing_mode(table),
        global_indexes,
    }
}

/// Tables created as provisioned usually carry no billing summary, only
/// their throughput.
fn billing_mode(table: &ddb::TableDescription) -> BillingMode {
    let on_demand = table
        .billing_mode_summary()
        .and_then(|summary| summary.billing_mode())
        == Some(&ddb::BillingMode::PayPerRequest);
    let throughput = table.provisioned_throughput();
    let read_capacity = throughput.and_then(|t| t.read_capacity_units()).unwrap_or(0);
    let write_capacity = throughput.and_then(|t| t.write_capacity_units()).unwrap_or(0);

    if on_demand || (read_capacity == 0 && write_capacity == 0) {
        BillingMode::PayPerRequest
    } else {
        BillingMode::Provisioned {
            read_capacity,
            write_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_description_maps_status_and_indexes() {
        let table = ddb::TableDescription::builder()
            .table_name("app.users")
            .table_status(ddb::TableStatus::Creating)
            .global_secondary_indexes(
                ddb::GlobalSecondaryIndexDescription::builder()
                    .index_name("by_email")
                    .index_status(ddb::IndexStatus::Creating)
                    .build(),
            )
            .build();

        let description = to_description(&table);
        assert_eq!(description.table_name, "app.users");
        assert_eq!(description.status, TableStatus::Creating);
        assert_eq!(
            description.global_indexes,
            vec![IndexState {
                name: "by_email".to_string(),
                status: IndexStatus::Creating,
            }]
        );
        assert_eq!(description.billing_mode, BillingMode::PayPerRequest);
    }

    #[test]
    fn test_to_description_reads_provisioned_throughput() {
        let table = ddb::TableDescription::builder()
            .table_name("app.users")
            .table_status(ddb::TableStatus::Active)
            .provisioned_throughput(
                ddb::ProvisionedThroughputDescription::builder()
                    .read_capacity_units(5)
                    .write_capacity_units(3)
                    .build(),
            )
            .build();

        assert_eq!(
            to_description(&table).billing_mode,
            BillingMode::Provisioned {
                read_capacity: 5,
                write_capacity: 3,
            }
        );
    }

    #[test]
    fn test_to_description_prefers_on_demand_summary() {
        let table = ddb::TableDescription::builder()
            .table_name("app.users")
            .billing_mode_summary(
                ddb::BillingModeSummary::builder()
                    .billing_mode(ddb::BillingMode::PayPerRequest)
                    .build(),
            )
            .provisioned_throughput(
                ddb::ProvisionedThroughputDescription::builder()
                    .read_capacity_units(0)
                    .write_capacity_units(0)
                    .build(),
            )
            .build();

        assert_eq!(to_description(&table).billing_mode, BillingMode::PayPerRequest);
    }

    #[test]
    fn test_classify_put_item_conditional_check() {
        let err = PutItemError::ConditionalCheckFailedException(
            aws_sdk_dynamodb::types::error::ConditionalCheckFailedException::builder()
                .message("The conditional request failed")
                .build(),
        );
        assert_eq!(classify_put_item(&err), FaultKind::ConditionalCheckFailed);
    }

    #[test]
    fn test_classify_query_missing_table() {
        let err = QueryError::ResourceNotFoundException(
            aws_sdk_dynamodb::types::error::ResourceNotFoundException::builder()
                .message("Requested resource not found")
                .build(),
        );
        assert_eq!(classify_query(&err), FaultKind::ResourceNotFound);
    }

    #[test]
    fn test_projection_include() {
        let built = projection(&ProjectionType::Include(vec!["email".to_string()]));
        assert_eq!(built.projection_type(), Some(&ddb::ProjectionType::Include));
        assert_eq!(built.non_key_attributes().to_vec(), vec!["email".to_string()]);
    }

    #[test]
    fn test_non_empty() {
        let empty: HashMap<String, String> = HashMap::new();
        assert_eq!(non_empty(&empty), None);

        let mut names = HashMap::new();
        names.insert("#id".to_string(), "id".to_string());
        assert_eq!(non_empty(&names), Some(names.clone()));
    }
}
