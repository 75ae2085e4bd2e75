//! BigQuery client abstraction.
//!
//! [`Warehouse`] is the seam between tasks and the service: [`BigQueryClient`]
//! talks to the REST API, [`InMemoryWarehouse`] keeps everything in process
//! for tests. Job orchestration (`run_job`, `copy`) is written once here on
//! top of the primitive operations.

pub mod auth;
pub mod memory;
pub mod rest;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::BigQueryError;
use crate::types::{
    BqDataset, BqTable, CopyJob, CreateDisposition, JobConfiguration, JobHandle, JobState,
    WriteDisposition,
};

pub use self::auth::{GoogleTokenSource, StaticTokenSource, TokenSource};
pub use self::memory::InMemoryWarehouse;
pub use self::rest::BigQueryClient;

pub type BqResult<T> = Result<T, BigQueryError>;

#[async_trait]
pub trait Warehouse: Send + Sync + std::fmt::Debug {
    /// Whether the dataset exists. If `dataset.location` is set and the remote
    /// dataset lives elsewhere, returns `LocationMismatch`.
    async fn dataset_exists(&self, dataset: &BqDataset) -> BqResult<bool>;

    async fn table_exists(&self, table: &BqTable) -> BqResult<bool>;

    /// Create the dataset. An existing dataset is fine unless `raise_if_exists`.
    async fn make_dataset(&self, dataset: &BqDataset, raise_if_exists: bool) -> BqResult<()>;

    /// Delete the dataset. Missing datasets are ignored.
    async fn delete_dataset(&self, dataset: &BqDataset, delete_nonempty: bool) -> BqResult<()>;

    /// Delete the table. Missing tables are ignored.
    async fn delete_table(&self, table: &BqTable) -> BqResult<()>;

    async fn list_datasets(&self, project_id: &str) -> BqResult<Vec<String>>;

    async fn list_tables(&self, dataset: &BqDataset) -> BqResult<Vec<String>>;

    /// The view query of a table, `None` if the table is missing or not a view.
    async fn get_view(&self, table: &BqTable) -> BqResult<Option<String>>;

    /// Create the view, or replace the query of an existing table.
    async fn update_view(&self, table: &BqTable, view: &str) -> BqResult<()>;

    async fn insert_job(
        &self,
        project_id: &str,
        configuration: &JobConfiguration,
    ) -> BqResult<JobHandle>;

    async fn job_state(&self, job: &JobHandle) -> BqResult<JobState>;

    /// Delay between `job_state` polls in [`Warehouse::run_job`].
    fn poll_interval(&self) -> Duration;

    /// `exists(project, dataset, table)` shorthand for [`Warehouse::table_exists`].
    async fn exists(&self, project_id: &str, dataset_id: &str, table_id: &str) -> BqResult<bool> {
        self.table_exists(&BqTable::new(project_id, dataset_id, table_id))
            .await
    }

    /// Submit a job and wait for it to finish.
    ///
    /// If `dataset` is given and missing, it is created first. Returns the job
    /// id; a job that finishes with an `errorResult` becomes `Execution`.
    async fn run_job(
        &self,
        project_id: &str,
        configuration: &JobConfiguration,
        dataset: Option<&BqDataset>,
    ) -> BqResult<String> {
        if let Some(dataset) = dataset
            && !self.dataset_exists(dataset).await?
        {
            self.make_dataset(dataset, false).await?;
        }

        let job = self.insert_job(project_id, configuration).await?;
        info!(
            job_id = %job.job_id,
            project = project_id,
            kind = configuration.kind(),
            "started BigQuery job"
        );

        loop {
            match self.job_state(&job).await? {
                JobState::Done { error: None } => {
                    info!(job_id = %job.job_id, "BigQuery job done");
                    return Ok(job.job_id);
                }
                JobState::Done { error: Some(err) } => {
                    return Err(BigQueryError::Execution {
                        job_id: job.job_id,
                        reason: err.reason,
                        message: err.message,
                    });
                }
                state => {
                    debug!(job_id = %job.job_id, ?state, "waiting for BigQuery job");
                    tokio::time::sleep(self.poll_interval()).await;
                }
            }
        }
    }

    /// Copy `source` into `dest` with a copy job.
    async fn copy(
        &self,
        source: &BqTable,
        dest: &BqTable,
        create_disposition: CreateDisposition,
        write_disposition: WriteDisposition,
    ) -> BqResult<String> {
        let configuration = JobConfiguration::Copy(CopyJob {
            source_table: source.reference(),
            destination_table: dest.reference(),
            create_disposition,
            write_disposition,
        });
        self.run_job(dest.project_id(), &configuration, Some(&dest.dataset))
            .await
    }
}
