//! Operator CLI for dynastore tables.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use dialoguer::Confirm;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dynastore::{EnsureTableOptions, Store, StoreConfig, TableOptions, TableSchema};
use dynastore_core::planning::{format_create_table, format_index_plan};

mod prelude;

use prelude::*;

/// Manage DynamoDB tables described by dynastore schemas
#[derive(Debug, Parser)]
#[command(name = "dynastore")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: Global,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, clap::Args)]
struct Global {
    /// Silence the command output
    #[clap(long, global = true)]
    silent: bool,
}

impl Global {
    fn is_silent(&self) -> bool {
        self.silent
    }
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// List existing tables
    Tables,

    /// Show the state of one table
    Describe {
        /// Full table name, prefix included
        #[arg(long)]
        table: String,
    },

    /// Create a table from a schema file and reconcile its global indexes
    #[command(long_about = "Create a table from a schema file and reconcile its global indexes.

The schema is a JSON-encoded table schema. A missing table is created first;
global secondary indexes are then compared with the live table by name and
missing ones are created while undeclared ones are deleted. The command shows
the plan and asks for confirmation before applying it.

Environment variables:
  DYNASTORE_TABLE_PREFIX  - Prefix prepended to the table name
  AWS_ENDPOINT_URL        - Use local DynamoDB (e.g., http://localhost:8000)
  AWS_REGION              - AWS region (defaults to us-east-1)")]
    Reconcile {
        /// Path to the JSON schema file
        #[arg(long, value_name = "FILE")]
        schema: PathBuf,

        /// Skip confirmation prompts
        #[arg(long)]
        force: bool,

        /// Do not wait for a new table to become active
        #[arg(long)]
        no_wait: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dynastore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StoreConfig::from_env();
    if !cli.global.is_silent() {
        aprintln!("{} {}", p_b("Target:"), config.target_display());
        aprintln!();
    }

    let store = Store::from_config(config);
    let result = match cli.command {
        Commands::Tables => run_tables(&store, &cli.global).await,
        Commands::Describe { table } => run_describe(&store, &table, &cli.global).await,
        Commands::Reconcile {
            schema,
            force,
            no_wait,
        } => run_reconcile(&store, &schema, force, !no_wait, &cli.global).await,
    };
    store.dispose().await;
    result
}

async fn run_tables(store: &Store, global: &Global) -> anyhow::Result<()> {
    let tables = store.list_tables().await?;
    if global.is_silent() {
        return Ok(());
    }
    if tables.is_empty() {
        aprintln!("{}", p_y("No tables found."));
    }
    for table in tables {
        aprintln!("{}", table);
    }
    Ok(())
}

async fn run_describe(store: &Store, table: &str, global: &Global) -> anyhow::Result<()> {
    let Some(description) = store.describe_table(table).await? else {
        bail!("table '{}' does not exist", table);
    };
    if global.is_silent() {
        return Ok(());
    }

    aprintln!("{} {}", p_c("Table:"), description.table_name);
    aprintln!("{} {:?}", p_c("Status:"), description.status);
    if description.global_indexes.is_empty() {
        aprintln!("{}", p_c("Global indexes: none"));
    } else {
        aprintln!("{}", p_c("Global indexes:"));
        for index in &description.global_indexes {
            aprintln!("  {} ({:?})", index.name, index.status);
        }
    }
    Ok(())
}

async fn run_reconcile(
    store: &Store,
    path: &Path,
    force: bool,
    wait_for_active: bool,
    global: &Global,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let schema: TableSchema = serde_json::from_str(&raw)
        .with_context(|| format!("invalid schema file {}", path.display()))?;
    let table_name = store.config().table_name(&schema.table_name);

    if store.describe_table(&table_name).await?.is_none() {
        let request = schema.create_table_request(&table_name, TableOptions::default())?;
        if !global.is_silent() {
            aprintln!("{}", p_c("Create Plan:"));
            print_plan(&format_create_table(&request));
            aprintln!();
        }
        confirm(force, "Create this table?")?;

        let options = EnsureTableOptions {
            wait_for_active,
            ..Default::default()
        };
        store.ensure_schema(&schema, options).await?;
        if !global.is_silent() {
            aprintln!("{}", p_g("Table created."));
        }
        if !wait_for_active {
            return Ok(());
        }
    }

    let plan = store.plan_indexes(&schema).await?;
    if !global.is_silent() {
        aprintln!("{}", p_c("Index Plan:"));
        print_plan(&format_index_plan(&plan));
        aprintln!();
    }
    if plan.is_empty() {
        return Ok(());
    }
    confirm(force, "Apply these changes?")?;

    let description = store.reconcile_schema_indexes(&schema).await?;
    if !global.is_silent() {
        aprintln!(
            "{} {} global index(es) on {}",
            p_g("Indexes reconciled:"),
            description.global_indexes.len(),
            description.table_name
        );
    }
    Ok(())
}

fn confirm(force: bool, prompt: &str) -> anyhow::Result<()> {
    if force {
        return Ok(());
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()?;
    if !confirmed {
        bail!("cancelled by user");
    }
    Ok(())
}
