//! Scenarios shared by the in-memory and live BigQuery suites.
//!
//! Each scenario owns its tables: names are derived from the calling test's
//! identity and a [`TableGuard`] deletes them when the test ends, pass or fail.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bq_tasks::client::Warehouse;
use bq_tasks::storage::StorageClient;
use bq_tasks::target::BigQueryTarget;
use bq_tasks::tasks::{LoadTask, RunQueryTask, Task};
use bq_tasks::types::{
    BqDataset, BqTable, CreateDisposition, FieldType, SchemaField, WriteDisposition,
};

pub const ROWS: &str = concat!(
    "{\"field1\": \"hi\", \"field2\": 1}\n",
    "{\"field1\": \"bye\", \"field2\": 2}\n",
);
pub const QUERY: &str = "SELECT 'hello' as field1, 2 as field2";

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Where a scenario reads and writes.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub warehouse: Arc<dyn Warehouse>,
    /// Used only by [`TableGuard`]; see [`Fixture::guard`].
    pub cleanup_warehouse: Arc<dyn Warehouse>,
    pub storage: Arc<StorageClient>,
    pub dataset: BqDataset,
    /// `gs://bucket/prefix`, no trailing slash.
    pub bucket_url: String,
}

impl Fixture {
    pub fn table(&self, identity: &TestIdentity) -> BqTable {
        self.dataset.table(identity.table_name())
    }

    pub fn target(&self, table: BqTable) -> BigQueryTarget {
        BigQueryTarget::new(table, Arc::clone(&self.warehouse))
    }

    pub fn object_uri(&self, identity: &TestIdentity, suffix: &str) -> String {
        format!("{}/{}{suffix}", self.bucket_url, identity.table_name())
    }

    pub fn guard(&self, table: &BqTable) -> TableGuard {
        TableGuard {
            table: table.clone(),
            warehouse: Arc::clone(&self.cleanup_warehouse),
        }
    }
}

/// A test's identity, e.g. `in_memory::load_and_copy`, plus a per-run suffix.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    id: String,
    run: String,
}

impl TestIdentity {
    pub fn new(id: &str) -> Self {
        let run = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: id.to_string(),
            run: run[..8].to_string(),
        }
    }

    /// Table-safe name: `[A-Za-z0-9_]` only.
    pub fn table_name(&self) -> String {
        let base: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{base}_{}", self.run)
    }
}

/// Deletes its table on drop, including during panic unwinding.
///
/// The delete runs on its own thread and runtime, so it is safe to drop the
/// guard inside a `#[tokio::test]`. Failures are logged, not retried.
#[derive(Debug)]
pub struct TableGuard {
    table: BqTable,
    warehouse: Arc<dyn Warehouse>,
}

impl Drop for TableGuard {
    fn drop(&mut self) {
        let table = self.table.clone();
        let warehouse = Arc::clone(&self.warehouse);
        let result = std::thread::spawn(move || -> Result<()> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building cleanup runtime")?;
            rt.block_on(warehouse.delete_table(&table))?;
            Ok(())
        })
        .join();
        match result {
            Ok(Ok(())) => tracing::info!("cleaned up {}", self.table),
            Ok(Err(e)) => tracing::warn!("failed to delete {}: {e:#}", self.table),
            Err(_) => tracing::warn!("cleanup thread for {} panicked", self.table),
        }
    }
}

/// Write two rows, load them, then list, copy, and delete the copy.
pub async fn load_and_copy(fx: &Fixture, identity: &TestIdentity) -> Result<()> {
    let table = fx.table(identity);
    let copy = table.sibling(format!("{}_copy", table.table_id));
    let _guard = fx.guard(&table);
    let _copy_guard = fx.guard(&copy);
    // Leftovers from an aborted run would make the WRITE_EMPTY load fail.
    fx.warehouse.delete_table(&table).await?;

    let uri = fx.object_uri(identity, ".json");
    fx.storage.put_string(ROWS, &uri).await?;

    let task = LoadTask::new(fx.target(table.clone()), vec![uri]).with_schema(vec![
        SchemaField::nullable("field1", FieldType::String),
        SchemaField::nullable("field2", FieldType::Integer),
    ]);
    task.run().await?;

    assert!(task.output().exists().await?, "{table} should exist after load");
    assert!(
        fx.warehouse
            .exists(table.project_id(), table.dataset_id(), &table.table_id)
            .await?
    );

    let datasets = fx.warehouse.list_datasets(table.project_id()).await?;
    assert!(
        datasets.iter().any(|d| d == table.dataset_id()),
        "{} not in {datasets:?}",
        table.dataset_id()
    );
    let tables = fx.warehouse.list_tables(&table.dataset).await?;
    assert!(
        tables.contains(&table.table_id),
        "{} not in {tables:?}",
        table.table_id
    );

    fx.warehouse
        .copy(
            &table,
            &copy,
            CreateDisposition::CreateIfNeeded,
            WriteDisposition::WriteTruncate,
        )
        .await?;
    assert!(fx.warehouse.table_exists(&copy).await?, "{copy} should exist after copy");

    fx.warehouse.delete_table(&copy).await?;
    assert!(!fx.warehouse.table_exists(&copy).await?, "{copy} should be gone");
    Ok(())
}

/// Run a literal query into a fresh table; only existence is checked.
pub async fn run_query(fx: &Fixture, identity: &TestIdentity) -> Result<()> {
    let table = fx.table(identity);
    let _guard = fx.guard(&table);

    let task = RunQueryTask::new(fx.target(table.clone()), QUERY);
    task.run().await?;

    assert!(task.output().exists().await?, "{table} should exist after query");
    Ok(())
}
