//! Table lifecycle: listing, creation with active-state polling, expiry and
//! global index reconciliation.

use dynastore_core::planning::plan_index_changes;
use dynastore_core::{
    ClientFault, CreateTableRequest, Error, IndexPlan, IndexUpdate, Record, Result, TableDescription,
    TableOptions, TableSchema, UpdateTableRequest,
};

use super::Store;
use crate::client::StorageClient;

/// Options for [`Store::ensure_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureTableOptions {
    /// Block until the new table reports `ACTIVE` (default: true)
    pub wait_for_active: bool,
    pub table: TableOptions,
}

impl Default for EnsureTableOptions {
    fn default() -> Self {
        Self {
            wait_for_active: true,
            table: TableOptions::default(),
        }
    }
}

impl<C: StorageClient + 'static> Store<C> {
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        match client.list_tables().await {
            Ok(tables) => Ok(tables),
            Err(fault) => Err(self.fail(None, fault)),
        }
    }

    /// Describes a table by full name. Returns `None` if it does not exist.
    pub async fn describe_table(&self, table_name: &str) -> Result<Option<TableDescription>> {
        let client = self.client().await?;
        match client.describe_table(table_name).await {
            Ok(description) => Ok(Some(description)),
            Err(fault) if fault.is_resource_not_found() => Ok(None),
            Err(fault) => Err(self.surface(&client, table_name, fault).await),
        }
    }

    /// Creates the table for `R` unless it already exists.
    pub async fn ensure_table<R: Record>(&self, options: EnsureTableOptions) -> Result<()> {
        self.ensure_schema(&R::schema(), options).await
    }

    pub async fn ensure_schema(
        &self,
        schema: &TableSchema,
        options: EnsureTableOptions,
    ) -> Result<()> {
        let table_name = self.config.table_name(&schema.table_name);
        let request = schema.create_table_request(&table_name, options.table)?;

        if self.list_tables().await?.contains(&table_name) {
            tracing::info!(table = %table_name, "Table already exists");
            return Ok(());
        }

        self.create_table(
            &request,
            options.wait_for_active,
            schema.expiry_field.as_deref(),
        )
        .await?;
        Ok(())
    }

    /// Creates a table, optionally waiting for it to become active.
    ///
    /// Polling is unbounded; wrap the call in a timeout if a bounded wait is
    /// needed. Once active, the configured settle delay elapses before the
    /// expiry attribute (if any) is enabled. Failing to enable expiry fails
    /// the whole call even though the table exists.
    pub async fn create_table(
        &self,
        request: &CreateTableRequest,
        wait_for_active: bool,
        expiry_field: Option<&str>,
    ) -> Result<TableDescription> {
        request.validate()?;
        let client = self.client().await?;
        let table_name = request.table_name.as_str();

        self.dump("before", "CreateTable", request);
        let mut description = match client.create_table(request).await {
            Ok(description) => description,
            Err(fault) => return Err(self.surface(&client, table_name, fault).await),
        };
        self.dump("after", "CreateTable", &description);
        tracing::info!(table = %table_name, "Table created");

        if wait_for_active {
            description = self.wait_for_active(&client, table_name).await?;
            if !self.config.settle_delay.is_zero() {
                tracing::debug!(
                    table = %table_name,
                    delay_ms = self.config.settle_delay.as_millis() as u64,
                    "Waiting for table to settle"
                );
                tokio::time::sleep(self.config.settle_delay).await;
            }
        }

        if let Some(field) = expiry_field {
            if let Err(fault) = client.update_time_to_live(table_name, field).await {
                return Err(self.surface(&client, table_name, fault).await);
            }
            tracing::info!(table = %table_name, attribute = field, "Time to live enabled");
        }

        Ok(description)
    }

    async fn wait_for_active(&self, client: &C, table_name: &str) -> Result<TableDescription> {
        loop {
            let description = match client.describe_table(table_name).await {
                Ok(description) => description,
                Err(fault) => return Err(self.surface(client, table_name, fault).await),
            };
            if description.is_active() {
                tracing::info!(table = %table_name, "Table is active");
                return Ok(description);
            }
            tracing::debug!(
                table = %table_name,
                status = ?description.status,
                "Waiting for table to become active"
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Computes the global index changes `schema` requires on its live table.
    pub async fn plan_indexes(&self, schema: &TableSchema) -> Result<IndexPlan> {
        let live = self.describe_live(schema).await?;
        Ok(plan_index_changes(&live, &schema.global_indexes))
    }

    async fn describe_live(&self, schema: &TableSchema) -> Result<TableDescription> {
        let table_name = self.config.table_name(&schema.table_name);
        self.describe_table(&table_name)
            .await?
            .ok_or(Error::TableNotFound { table: table_name })
    }

    /// Brings the global indexes of `R`'s table in line with its schema.
    pub async fn reconcile_indexes<R: Record>(&self) -> Result<TableDescription> {
        self.reconcile_schema_indexes(&R::schema()).await
    }

    /// Deletes live indexes the schema no longer declares and creates the
    /// declared ones that are missing, one update call per index. Indexes
    /// are matched by name only. Returns a fresh description.
    pub async fn reconcile_schema_indexes(&self, schema: &TableSchema) -> Result<TableDescription> {
        let table_name = self.config.table_name(&schema.table_name);
        for index in &schema.global_indexes {
            schema.index_attribute_definitions(index)?;
        }

        let live = self.describe_live(schema).await?;
        let plan = plan_index_changes(&live, &schema.global_indexes);
        if plan.is_empty() {
            tracing::info!(table = %table_name, "Indexes are up to date");
        }

        let mut updates = Vec::with_capacity(plan.to_delete.len() + plan.to_create.len());
        for index_name in plan.to_delete {
            updates.push(UpdateTableRequest {
                table_name: table_name.clone(),
                attribute_definitions: Vec::new(),
                billing_mode: live.billing_mode,
                index_update: IndexUpdate::Delete { index_name },
            });
        }
        for index in plan.to_create {
            updates.push(UpdateTableRequest {
                table_name: table_name.clone(),
                attribute_definitions: schema.index_attribute_definitions(&index)?,
                billing_mode: live.billing_mode,
                index_update: IndexUpdate::Create(index),
            });
        }

        let client = self.client().await?;
        for update in &updates {
            self.dump("before", "UpdateTable", update);
            if let Err(fault) = client.update_table(update).await {
                return Err(match &update.index_update {
                    IndexUpdate::Delete { index_name } if fault.is_resource_not_found() => {
                        self.missing_index(&table_name, index_name, fault).await
                    }
                    _ => self.surface(&client, &table_name, fault).await,
                });
            }
            match &update.index_update {
                IndexUpdate::Delete { index_name } => {
                    tracing::info!(table = %table_name, index = %index_name, "Deleted global index")
                }
                IndexUpdate::Create(index) => {
                    tracing::info!(table = %table_name, index = %index.name, "Created global index")
                }
            }
        }

        self.describe_table(&table_name)
            .await?
            .ok_or(Error::TableNotFound { table: table_name })
    }

    /// Tells a vanished index apart from a vanished table after a delete
    /// was rejected as not found.
    async fn missing_index(&self, table_name: &str, index_name: &str, fault: ClientFault) -> Error {
        match self.describe_table(table_name).await {
            Ok(Some(_)) => {
                tracing::warn!(table = %table_name, index = %index_name, error = %fault, "Index not found");
                Error::IndexNotFound {
                    table: table_name.to_string(),
                    index: index_name.to_string(),
                }
            }
            Ok(None) => Error::TableNotFound {
                table: table_name.to_string(),
            },
            Err(err) => err,
        }
    }
}
