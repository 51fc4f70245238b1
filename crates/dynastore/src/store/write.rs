//! Version-guarded writes and deletes.

use dynastore_core::expression::version_guard;
use dynastore_core::marshal::marshall;
use dynastore_core::{
    AttributeValue, Error, ItemKey, KeyValue, Record, Result, TableSchema, VersionBump,
};

use super::{EnsureTableOptions, Store};
use crate::client::{DeleteItemRequest, PutItemRequest, StorageClient};

/// Options for [`Store::put_item`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Create the table and retry once if it does not exist (default: false)
    pub create_table_if_missing: bool,
}

impl PutOptions {
    pub fn self_healing() -> Self {
        Self {
            create_table_if_missing: true,
        }
    }
}

impl<C: StorageClient + 'static> Store<C> {
    /// Writes `record`, guarded by its version when it has one.
    ///
    /// The in-memory version is bumped before the write and restored if the
    /// write fails, so a failed call leaves `record` as it was. A version
    /// mismatch fails with [`Error::Conflict`].
    pub async fn put_item<R: Record>(&self, record: &mut R, options: PutOptions) -> Result<()> {
        let schema = R::schema();
        let table_name = self.config.table_name(&schema.table_name);
        let mut heal = options.create_table_if_missing;

        loop {
            match self.put_versioned(&schema, &table_name, record).await {
                Err(Error::TableNotFound { table }) if heal => {
                    heal = false;
                    if self.list_tables().await?.contains(&table_name) {
                        tracing::warn!(table = %table_name, "Table reported missing but is listed");
                        return Err(Error::TableNotFound { table });
                    }
                    tracing::warn!(table = %table_name, "Table missing, creating it before retrying");
                    self.ensure_schema(&schema, EnsureTableOptions::default())
                        .await?;
                }
                result => return result,
            }
        }
    }

    async fn put_versioned<R: Record>(
        &self,
        schema: &TableSchema,
        table_name: &str,
        record: &mut R,
    ) -> Result<()> {
        let bump = VersionBump::apply(record);
        let result = self.write(schema, table_name, record, bump).await;

        if let (Err(_), Some(bump)) = (&result, bump) {
            bump.rollback(record);
            tracing::debug!(
                table = %table_name,
                version = bump.expected(),
                "Rolled back version"
            );
        }
        result
    }

    async fn write<R: Record>(
        &self,
        schema: &TableSchema,
        table_name: &str,
        record: &R,
        bump: Option<VersionBump>,
    ) -> Result<()> {
        let mut item = marshall(self.marshaller(), record)?;
        let key = ItemKey::from_item(schema, &item)?;

        let condition = bump.map(|bump| {
            item.insert(
                schema.version_field.clone(),
                AttributeValue::N(bump.next().to_string()),
            );
            version_guard(&schema.version_field, bump.expected())
        });

        let client = self.client().await?;
        let request = PutItemRequest {
            table_name: table_name.to_string(),
            item,
            condition,
        };

        self.dump("before", "PutItem", &request);
        match client.put_item(&request).await {
            Ok(()) => {
                self.dump("after", "PutItem", &key);
                tracing::debug!(table = %table_name, %key, "Item written");
                Ok(())
            }
            Err(fault) if fault.is_conditional_check_failed() => {
                tracing::warn!(table = %table_name, %key, "Version conflict");
                Err(Error::Conflict {
                    table: table_name.to_string(),
                    key: key.to_string(),
                })
            }
            Err(fault) => Err(self.surface(&client, table_name, fault).await),
        }
    }

    /// Deletes one item by key. Deleting an absent item succeeds.
    pub async fn delete_item<R: Record>(
        &self,
        id: impl Into<KeyValue>,
        range: Option<KeyValue>,
    ) -> Result<()> {
        let schema = R::schema();
        let table_name = self.config.table_name(&schema.table_name);
        let key = ItemKey::resolve(&schema, &id.into(), range.as_ref())?;

        let client = self.client().await?;
        let request = DeleteItemRequest {
            table_name: table_name.clone(),
            key: key.to_item(),
        };

        self.dump("before", "DeleteItem", &request);
        match client.delete_item(&request).await {
            Ok(()) => {
                tracing::debug!(table = %table_name, %key, "Item deleted");
                Ok(())
            }
            Err(fault) => Err(self.surface(&client, &table_name, fault).await),
        }
    }
}
