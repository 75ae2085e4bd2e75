use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::Task;
use crate::error::BigQueryError;
use crate::target::{BigQueryTarget, Target};
use crate::types::{
    CreateDisposition, JobConfiguration, QueryJob, QueryPriority, UdfResource, WriteDisposition,
};

/// Run a query and store its result in the target table.
#[derive(Debug, Clone)]
pub struct RunQueryTask {
    target: BigQueryTarget,
    query: String,
    priority: QueryPriority,
    write_disposition: WriteDisposition,
    create_disposition: CreateDisposition,
    flatten_results: bool,
    use_legacy_sql: bool,
    udf_resource_uris: Vec<String>,
    requires: Vec<Arc<dyn Task>>,
}

impl RunQueryTask {
    pub fn new(target: BigQueryTarget, query: impl Into<String>) -> Self {
        Self {
            target,
            query: query.into(),
            priority: QueryPriority::Interactive,
            write_disposition: WriteDisposition::WriteTruncate,
            create_disposition: CreateDisposition::CreateIfNeeded,
            flatten_results: true,
            use_legacy_sql: true,
            udf_resource_uris: Vec::new(),
            requires: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: QueryPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_write_disposition(mut self, write_disposition: WriteDisposition) -> Self {
        self.write_disposition = write_disposition;
        self
    }

    #[must_use]
    pub const fn with_create_disposition(mut self, create_disposition: CreateDisposition) -> Self {
        self.create_disposition = create_disposition;
        self
    }

    #[must_use]
    pub const fn with_flatten_results(mut self, flatten: bool) -> Self {
        self.flatten_results = flatten;
        self
    }

    #[must_use]
    pub const fn with_legacy_sql(mut self, legacy: bool) -> Self {
        self.use_legacy_sql = legacy;
        self
    }

    #[must_use]
    pub fn with_udf_resource_uris(mut self, uris: Vec<String>) -> Self {
        self.udf_resource_uris = uris;
        self
    }

    #[must_use]
    pub fn with_requires(mut self, requires: Vec<Arc<dyn Task>>) -> Self {
        self.requires = requires;
        self
    }

    pub const fn target(&self) -> &BigQueryTarget {
        &self.target
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// The query job this task submits. Large results are always allowed.
    pub fn job_configuration(&self) -> Result<JobConfiguration, BigQueryError> {
        if self.query.trim().is_empty() {
            return Err(BigQueryError::Configuration(format!(
                "query for {} is empty",
                self.target.table
            )));
        }
        Ok(JobConfiguration::Query(QueryJob {
            query: self.query.clone(),
            priority: self.priority,
            destination_table: self.target.table.reference(),
            allow_large_results: true,
            create_disposition: self.create_disposition,
            write_disposition: self.write_disposition,
            flatten_results: self.flatten_results,
            user_defined_function_resources: self
                .udf_resource_uris
                .iter()
                .map(|uri| UdfResource {
                    resource_uri: uri.clone(),
                })
                .collect(),
            use_legacy_sql: self.use_legacy_sql,
        }))
    }
}

#[async_trait]
impl Task for RunQueryTask {
    fn task_id(&self) -> String {
        super::task_id("RunQueryTask", &self.target)
    }

    fn output(&self) -> Arc<dyn Target> {
        Arc::new(self.target.clone())
    }

    fn requires(&self) -> Vec<Arc<dyn Task>> {
        self.requires.clone()
    }

    async fn run(&self) -> Result<()> {
        let configuration = self.job_configuration()?;
        let table = &self.target.table;
        info!(table = %table, "running query into BigQuery table");
        self.target
            .client
            .run_job(table.project_id(), &configuration, Some(&table.dataset))
            .await
            .with_context(|| format!("running query into {table}"))?;
        Ok(())
    }
}
