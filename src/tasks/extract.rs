use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{ExternalTableTask, Task};
use crate::error::BigQueryError;
use crate::storage::StorageClient;
use crate::target::{BigQueryTarget, ObjectTarget, Target};
use crate::types::{Compression, DestinationFormat, ExtractJob, JobConfiguration};

/// Export a table to one or more storage objects.
///
/// Without explicit requirements the source table is required through an
/// [`ExternalTableTask`], so the extract is blocked rather than failing
/// mid-job when the table is missing. Completion is judged by the first
/// destination URI.
#[derive(Debug, Clone)]
pub struct ExtractTask {
    source: BigQueryTarget,
    destination_uris: Vec<String>,
    storage: Arc<StorageClient>,
    destination_format: DestinationFormat,
    compression: Compression,
    field_delimiter: String,
    print_header: bool,
    requires: Vec<Arc<dyn Task>>,
}

impl ExtractTask {
    pub fn new(
        source: BigQueryTarget,
        destination_uris: Vec<String>,
        storage: Arc<StorageClient>,
    ) -> Result<Self, BigQueryError> {
        if destination_uris.is_empty() {
            return Err(BigQueryError::Configuration(format!(
                "extract of {} has no destination URIs",
                source.table
            )));
        }
        Ok(Self {
            source,
            destination_uris,
            storage,
            destination_format: DestinationFormat::Csv,
            compression: Compression::None,
            field_delimiter: ",".to_string(),
            print_header: true,
            requires: Vec::new(),
        })
    }

    #[must_use]
    pub const fn with_destination_format(mut self, format: DestinationFormat) -> Self {
        self.destination_format = format;
        self
    }

    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// CSV options; ignored for other formats.
    #[must_use]
    pub fn with_csv_options(
        mut self,
        field_delimiter: impl Into<String>,
        print_header: bool,
    ) -> Self {
        self.field_delimiter = field_delimiter.into();
        self.print_header = print_header;
        self
    }

    /// Tasks that produce the source table; they replace the external check.
    #[must_use]
    pub fn with_requires(mut self, requires: Vec<Arc<dyn Task>>) -> Self {
        self.requires = requires;
        self
    }

    pub fn job_configuration(&self) -> JobConfiguration {
        let csv = self.destination_format == DestinationFormat::Csv;
        JobConfiguration::Extract(ExtractJob {
            source_table: self.source.table.reference(),
            destination_uris: self.destination_uris.clone(),
            destination_format: self.destination_format,
            compression: self.compression,
            field_delimiter: csv.then(|| self.field_delimiter.clone()),
            print_header: csv.then_some(self.print_header),
        })
    }
}

#[async_trait]
impl Task for ExtractTask {
    fn task_id(&self) -> String {
        format!(
            "ExtractTask({} -> {})",
            self.source.describe(),
            self.destination_uris.join(",")
        )
    }

    fn output(&self) -> Arc<dyn Target> {
        // Non-empty, checked in `new`.
        let uri = self.destination_uris.first().cloned().unwrap_or_default();
        Arc::new(ObjectTarget::new(uri, Arc::clone(&self.storage)))
    }

    fn requires(&self) -> Vec<Arc<dyn Task>> {
        if self.requires.is_empty() {
            vec![Arc::new(ExternalTableTask::new(self.source.clone()))]
        } else {
            self.requires.clone()
        }
    }

    async fn run(&self) -> Result<()> {
        let table = &self.source.table;
        info!(table = %table, destinations = ?self.destination_uris, "extracting table");
        self.source
            .client
            .run_job(table.project_id(), &self.job_configuration(), None)
            .await
            .with_context(|| format!("extracting {table}"))?;
        Ok(())
    }
}
