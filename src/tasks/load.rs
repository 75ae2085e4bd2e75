use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::Task;
use crate::error::BigQueryError;
use crate::target::{BigQueryTarget, Target};
use crate::types::{
    CreateDisposition, Encoding, JobConfiguration, LoadJob, SchemaField, SourceFormat,
    TableSchema, WriteDisposition,
};

/// Load files from Cloud Storage into a table.
#[derive(Debug, Clone)]
pub struct LoadTask {
    target: BigQueryTarget,
    source_uris: Vec<String>,
    schema: Vec<SchemaField>,
    source_format: SourceFormat,
    encoding: Encoding,
    write_disposition: WriteDisposition,
    create_disposition: CreateDisposition,
    max_bad_records: u32,
    ignore_unknown_values: bool,
    field_delimiter: String,
    skip_leading_rows: u32,
    allow_jagged_rows: bool,
    allow_quoted_newlines: bool,
    requires: Vec<Arc<dyn Task>>,
}

impl LoadTask {
    pub fn new(target: BigQueryTarget, source_uris: Vec<String>) -> Self {
        Self {
            target,
            source_uris,
            schema: Vec::new(),
            source_format: SourceFormat::NewlineDelimitedJson,
            encoding: Encoding::Utf8,
            write_disposition: WriteDisposition::WriteEmpty,
            create_disposition: CreateDisposition::CreateIfNeeded,
            max_bad_records: 0,
            ignore_unknown_values: false,
            field_delimiter: ",".to_string(),
            skip_leading_rows: 0,
            allow_jagged_rows: false,
            allow_quoted_newlines: false,
            requires: Vec::new(),
        }
    }

    /// Explicit schema. Without one the service autodetects it.
    #[must_use]
    pub fn with_schema(mut self, schema: Vec<SchemaField>) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub const fn with_source_format(mut self, source_format: SourceFormat) -> Self {
        self.source_format = source_format;
        self
    }

    #[must_use]
    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
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
    pub const fn with_max_bad_records(mut self, max_bad_records: u32) -> Self {
        self.max_bad_records = max_bad_records;
        self
    }

    #[must_use]
    pub const fn with_ignore_unknown_values(mut self, ignore: bool) -> Self {
        self.ignore_unknown_values = ignore;
        self
    }

    /// CSV options; ignored for other formats.
    #[must_use]
    pub fn with_csv_options(
        mut self,
        field_delimiter: impl Into<String>,
        skip_leading_rows: u32,
        allow_jagged_rows: bool,
        allow_quoted_newlines: bool,
    ) -> Self {
        self.field_delimiter = field_delimiter.into();
        self.skip_leading_rows = skip_leading_rows;
        self.allow_jagged_rows = allow_jagged_rows;
        self.allow_quoted_newlines = allow_quoted_newlines;
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

    pub fn source_uris(&self) -> &[String] {
        &self.source_uris
    }

    /// The load job this task submits.
    pub fn job_configuration(&self) -> Result<JobConfiguration, BigQueryError> {
        if self.source_uris.is_empty() {
            return Err(BigQueryError::Configuration(format!(
                "load into {} has no source URIs",
                self.target.table
            )));
        }
        if let Some(bad) = self.source_uris.iter().find(|u| !u.starts_with("gs://")) {
            return Err(BigQueryError::Configuration(format!(
                "load source {bad} is not a gs:// URI"
            )));
        }

        let csv = self.source_format == SourceFormat::Csv;
        let (schema, autodetect) = if self.schema.is_empty() {
            (None, Some(true))
        } else {
            (
                Some(TableSchema {
                    fields: self.schema.clone(),
                }),
                None,
            )
        };

        Ok(JobConfiguration::Load(LoadJob {
            destination_table: self.target.table.reference(),
            source_uris: self.source_uris.clone(),
            source_format: self.source_format,
            encoding: self.encoding,
            write_disposition: self.write_disposition,
            create_disposition: self.create_disposition,
            max_bad_records: self.max_bad_records,
            ignore_unknown_values: self.ignore_unknown_values,
            schema,
            autodetect,
            field_delimiter: csv.then(|| self.field_delimiter.clone()),
            skip_leading_rows: csv.then_some(self.skip_leading_rows),
            allow_jagged_rows: csv.then_some(self.allow_jagged_rows),
            allow_quoted_newlines: csv.then_some(self.allow_quoted_newlines),
        }))
    }
}

#[async_trait]
impl Task for LoadTask {
    fn task_id(&self) -> String {
        super::task_id("LoadTask", &self.target)
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
        info!(table = %table, sources = self.source_uris.len(), "loading into BigQuery");
        self.target
            .client
            .run_job(table.project_id(), &configuration, Some(&table.dataset))
            .await
            .with_context(|| format!("loading {table}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryWarehouse;
    use crate::storage::StorageClient;
    use crate::types::{BqTable, FieldType};

    fn target(table: &str) -> BigQueryTarget {
        let storage = Arc::new(StorageClient::in_memory("bucket"));
        BigQueryTarget::new(
            BqTable::new("p", "d", table),
            Arc::new(InMemoryWarehouse::new(storage)),
        )
    }

    #[test]
    fn json_load_with_schema() -> anyhow::Result<()> {
        let task = LoadTask::new(target("t"), vec!["gs://b/k.json".into()]).with_schema(vec![
            SchemaField::nullable("field1", FieldType::String),
            SchemaField::nullable("field2", FieldType::Integer),
        ]);
        let JobConfiguration::Load(job) = task.job_configuration()? else {
            anyhow::bail!("expected a load job");
        };
        assert_eq!(job.write_disposition, WriteDisposition::WriteEmpty);
        assert_eq!(job.source_format, SourceFormat::NewlineDelimitedJson);
        assert_eq!(job.schema.map(|s| s.fields.len()), Some(2));
        assert!(job.autodetect.is_none());
        assert!(job.field_delimiter.is_none());
        assert_eq!(job.destination_table.table_id, "t");
        Ok(())
    }

    #[test]
    fn empty_schema_autodetects() -> anyhow::Result<()> {
        let task = LoadTask::new(target("t"), vec!["gs://b/k.json".into()]);
        let JobConfiguration::Load(job) = task.job_configuration()? else {
            anyhow::bail!("expected a load job");
        };
        assert_eq!(job.autodetect, Some(true));
        assert!(job.schema.is_none());
        Ok(())
    }

    #[test]
    fn csv_options_only_for_csv() -> anyhow::Result<()> {
        let task = LoadTask::new(target("t"), vec!["gs://b/k.csv".into()])
            .with_source_format(SourceFormat::Csv)
            .with_csv_options(";", 1, true, false);
        let JobConfiguration::Load(job) = task.job_configuration()? else {
            anyhow::bail!("expected a load job");
        };
        assert_eq!(job.field_delimiter.as_deref(), Some(";"));
        assert_eq!(job.skip_leading_rows, Some(1));
        assert_eq!(job.allow_jagged_rows, Some(true));
        assert_eq!(job.allow_quoted_newlines, Some(false));
        Ok(())
    }

    #[test]
    fn non_gcs_source_is_rejected() {
        let task = LoadTask::new(target("t"), vec!["s3://b/k.json".into()]);
        let err = task.job_configuration().err();
        assert!(
            matches!(err, Some(BigQueryError::Configuration(ref m)) if m.contains("s3://b/k.json"))
        );

        let empty = LoadTask::new(target("t"), Vec::new());
        assert!(empty.job_configuration().is_err());
    }

    #[test]
    fn task_id_names_the_table() {
        let task = LoadTask::new(target("t"), vec!["gs://b/k".into()]);
        assert_eq!(task.task_id(), "LoadTask(p:d.t)");
    }
}
