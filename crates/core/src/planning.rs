//! Pure functions for diffing live tables against schemas (Functional Core).

use std::collections::BTreeSet;

use crate::schema::{BillingMode, CreateTableRequest, IndexConfig};

/// Snapshot of a table as reported by the storage service.
///
/// Fetched fresh for every reconciliation; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table_name: String,
    pub status: TableStatus,
    pub billing_mode: BillingMode,
    pub global_indexes: Vec<IndexState>,
}

impl TableDescription {
    pub fn is_active(&self) -> bool {
        self.status == TableStatus::Active
    }

    pub fn index_names(&self) -> BTreeSet<&str> {
        self.global_indexes.iter().map(|i| i.name.as_str()).collect()
    }
}

/// Table status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Other,
}

/// Global secondary index state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexState {
    pub name: String,
    pub status: IndexStatus,
}

/// Index status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

/// Index mutations needed to bring a live table in line with its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub table_name: String,
    pub to_delete: Vec<String>,
    pub to_create: Vec<IndexConfig>,
}

impl IndexPlan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty()
    }
}

/// Pure function: diff live global indexes against the declared ones.
///
/// Indexes are compared by name only. An index redeclared under the same
/// name with a different key schema is not reported as changed.
pub fn plan_index_changes(live: &TableDescription, declared: &[IndexConfig]) -> IndexPlan {
    let declared_names: BTreeSet<&str> = declared.iter().map(|i| i.name.as_str()).collect();
    let live_names = live.index_names();

    let to_delete = live
        .global_indexes
        .iter()
        .filter(|index| !declared_names.contains(index.name.as_str()))
        .map(|index| index.name.clone())
        .collect();

    let to_create = declared
        .iter()
        .filter(|index| !live_names.contains(index.name.as_str()))
        .cloned()
        .collect();

    IndexPlan {
        table_name: live.table_name.clone(),
        to_delete,
        to_create,
    }
}

/// Pure function: Format an index plan for display.
pub fn format_index_plan(plan: &IndexPlan) -> Vec<String> {
    if plan.is_empty() {
        return vec![format!("= Table '{}' indexes are up to date", plan.table_name)];
    }

    let mut lines = vec![format!("~ Update table: {}", plan.table_name)];
    for name in &plan.to_delete {
        lines.push(format!("  - Delete GSI: {}", name));
    }
    for index in &plan.to_create {
        lines.push(format!("  + Add GSI: {}", index.name));
        lines.push(format!("    Partition key: {}", index.partition_key));
        if let Some(sk) = &index.sort_key {
            lines.push(format!("    Sort key: {}", sk));
        }
    }
    lines
}

/// Pure function: Format a create-table request for display.
pub fn format_create_table(request: &CreateTableRequest) -> Vec<String> {
    let mut lines = vec![
        format!("+ Create table: {}", request.table_name),
        format!(
            "  Partition key: {} ({})",
            request.partition_key.name,
            request.partition_key.attribute_type.tag()
        ),
    ];
    if let Some(sk) = &request.sort_key {
        lines.push(format!("  Sort key: {} ({})", sk.name, sk.attribute_type.tag()));
    }
    for index in &request.local_indexes {
        lines.push(format!("  + LSI: {}", index.name));
    }
    for index in &request.global_indexes {
        lines.push(format!("  + GSI: {}", index.name));
        lines.push(format!("    Partition key: {}", index.partition_key));
        if let Some(sk) = &index.sort_key {
            lines.push(format!("    Sort key: {}", sk));
        }
    }
    lines.push(match request.billing_mode {
        BillingMode::PayPerRequest => "  Billing: PAY_PER_REQUEST".to_string(),
        BillingMode::Provisioned {
            read_capacity,
            write_capacity,
        } => format!("  Billing: PROVISIONED (read {read_capacity}, write {write_capacity})"),
    });
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeType, TableOptions, TableSchema};

    fn live_table(indexes: &[&str]) -> TableDescription {
        TableDescription {
            table_name: "app.users".to_string(),
            status: TableStatus::Active,
            billing_mode: BillingMode::PayPerRequest,
            global_indexes: indexes
                .iter()
                .map(|name| IndexState {
                    name: name.to_string(),
                    status: IndexStatus::Active,
                })
                .collect(),
        }
    }

    #[test]
    fn test_plan_deletes_and_creates_by_name() {
        let declared = vec![IndexConfig::new("B", "b"), IndexConfig::new("C", "c")];
        let plan = plan_index_changes(&live_table(&["A", "B"]), &declared);

        assert_eq!(plan.to_delete, vec!["A".to_string()]);
        assert_eq!(plan.to_create, vec![IndexConfig::new("C", "c")]);
    }

    #[test]
    fn test_plan_ignores_key_schema_changes() {
        let declared = vec![IndexConfig::new("A", "renamed_key").with_sort_key("other")];
        let plan = plan_index_changes(&live_table(&["A"]), &declared);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_format_index_plan() {
        let declared = vec![IndexConfig::new("C", "c").with_sort_key("d")];
        let plan = plan_index_changes(&live_table(&["A"]), &declared);

        assert_eq!(
            format_index_plan(&plan),
            vec![
                "~ Update table: app.users",
                "  - Delete GSI: A",
                "  + Add GSI: C",
                "    Partition key: c",
                "    Sort key: d",
            ]
        );
    }

    #[test]
    fn test_format_empty_plan() {
        let plan = plan_index_changes(&live_table(&[]), &[]);
        assert_eq!(
            format_index_plan(&plan),
            vec!["= Table 'app.users' indexes are up to date"]
        );
    }

    #[test]
    fn test_format_create_table() {
        let request = TableSchema::new("users", "id", AttributeType::String)
            .with_attribute("email", AttributeType::String)
            .with_global_index(IndexConfig::new("by_email", "email"))
            .create_table_request("app.users", TableOptions::default())
            .unwrap();

        assert_eq!(
            format_create_table(&request),
            vec![
                "+ Create table: app.users",
                "  Partition key: id (S)",
                "  + GSI: by_email",
                "    Partition key: email",
                "  Billing: PAY_PER_REQUEST",
            ]
        );
    }
}
