//! Shared live infrastructure: BigQuery client, storage, and dataset from env vars.
//!
//! Cleanup strategy:
//!   1. Table names carry the test's identity plus a per-run suffix.
//!   2. Each scenario holds a `TableGuard` per table it creates; dropping the
//!      guard deletes the table, also when the test fails.
//!   3. The dataset itself (`BQ_TEST_DATASET_ID`) is shared and left in place.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};

use bq_tasks::client::{BigQueryClient, GoogleTokenSource, TokenSource, Warehouse};
use bq_tasks::config::BqTasksConfig;
use bq_tasks::config::env::env_or;
use bq_tasks::storage::StorageClient;
use bq_tasks::types::BqDataset;

use crate::scenarios::Fixture;

pub struct SharedInfra {
    pub config: BqTasksConfig,
    pub dataset: BqDataset,
    pub bucket: String,
}

/// Read the test settings once per test binary.
pub fn shared_infra() -> &'static SharedInfra {
    static INFRA: OnceLock<SharedInfra> = OnceLock::new();
    INFRA.get_or_init(|| match load_infra() {
        Ok(infra) => infra,
        Err(e) => panic!("infrastructure init failed: {e:#}"),
    })
}

fn load_infra() -> Result<SharedInfra> {
    let project = std::env::var("GCS_TEST_PROJECT_ID")
        .context("GCS_TEST_PROJECT_ID env var is required for BigQuery tests")?;
    let bucket = std::env::var("GCS_TEST_BUCKET")
        .context("GCS_TEST_BUCKET env var is required for BigQuery tests")?;
    let dataset_id = env_or("BQ_TEST_DATASET_ID", "luigi_tests");

    let mut config =
        BqTasksConfig::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    config.project_id = Some(project.clone());

    let mut dataset = BqDataset::new(project, dataset_id);
    if let Some(location) = &config.location {
        dataset = dataset.with_location(location.clone());
    }
    tracing::info!("Using dataset {dataset}, bucket gs://{bucket}");

    Ok(SharedInfra {
        config,
        dataset,
        bucket,
    })
}

impl SharedInfra {
    /// A fixture for one test, with credentials resolved on the test's runtime.
    ///
    /// The cleanup guard gets its own HTTP client so it never reuses pooled
    /// connections owned by the test's runtime.
    pub async fn fixture(&self) -> Result<Fixture> {
        let tokens: Arc<dyn TokenSource> = Arc::new(
            GoogleTokenSource::from_environment()
                .await
                .context("resolving application default credentials")?,
        );
        let client = |tokens: &Arc<dyn TokenSource>| -> Arc<dyn Warehouse> {
            Arc::new(BigQueryClient::new(&self.config, Arc::clone(tokens)))
        };
        Ok(Fixture {
            warehouse: client(&tokens),
            cleanup_warehouse: client(&tokens),
            storage: Arc::new(StorageClient::new()),
            dataset: self.dataset.clone(),
            bucket_url: format!("gs://{}/luigi_tests", self.bucket),
        })
    }
}
