//! In-process warehouse used as a test double for [`BigQueryClient`](super::BigQueryClient).
//!
//! Jobs run to completion inside `insert_job`; their outcome is reported
//! through `job_state` the same way the service reports it, so `run_job`
//! behaves identically against both implementations.
//!
//! Load jobs read `NEWLINE_DELIMITED_JSON` sources through a [`StorageClient`].
//! Query jobs don't evaluate SQL: the destination table receives the rows
//! registered with [`InMemoryWarehouse::stub_query`], or no rows at all.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{BqResult, Warehouse};
use crate::error::BigQueryError;
use crate::storage::StorageClient;
use crate::types::{
    BqDataset, BqTable, CopyJob, CreateDisposition, DestinationFormat, ErrorProto, ExtractJob,
    JobConfiguration, JobHandle, JobState, LoadJob, QueryJob, SchemaField, SourceFormat,
    TableReference, WriteDisposition, record_accepts,
};

const DEFAULT_LOCATION: &str = "US";

#[derive(Debug, Clone, Default)]
struct TableState {
    schema: Option<Vec<SchemaField>>,
    rows: Vec<Value>,
    view: Option<String>,
}

#[derive(Debug, Default)]
struct DatasetState {
    location: String,
    tables: BTreeMap<String, TableState>,
}

#[derive(Debug, Default)]
struct State {
    /// project → dataset → state
    projects: BTreeMap<String, BTreeMap<String, DatasetState>>,
    jobs: BTreeMap<String, JobState>,
    submitted: Vec<JobConfiguration>,
    query_results: BTreeMap<String, Vec<Value>>,
}

impl State {
    fn dataset(&self, project_id: &str, dataset_id: &str) -> Option<&DatasetState> {
        self.projects.get(project_id)?.get(dataset_id)
    }

    fn dataset_mut(&mut self, project_id: &str, dataset_id: &str) -> Option<&mut DatasetState> {
        self.projects.get_mut(project_id)?.get_mut(dataset_id)
    }

    fn table(&self, r: &TableReference) -> Option<&TableState> {
        self.dataset(&r.project_id, &r.dataset_id)?
            .tables
            .get(&r.table_id)
    }
}

pub struct InMemoryWarehouse {
    storage: Arc<StorageClient>,
    state: Mutex<State>,
}

impl std::fmt::Debug for InMemoryWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWarehouse")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl InMemoryWarehouse {
    pub fn new(storage: Arc<StorageClient>) -> Self {
        Self {
            storage,
            state: Mutex::new(State::default()),
        }
    }

    /// Rows a query job writes when its (trimmed) SQL equals `query`.
    pub fn stub_query(&self, query: &str, rows: Vec<Value>) {
        if let Ok(mut state) = self.state.lock() {
            state.query_results.insert(query.trim().to_string(), rows);
        }
    }

    /// Current rows of a table, `None` if it doesn't exist.
    pub fn rows(&self, table: &BqTable) -> Option<Vec<Value>> {
        let state = self.state.lock().ok()?;
        state.table(&table.reference()).map(|t| t.rows.clone())
    }

    /// Schema recorded for a table by the job that created it.
    pub fn schema(&self, table: &BqTable) -> Option<Vec<SchemaField>> {
        let state = self.state.lock().ok()?;
        state.table(&table.reference())?.schema.clone()
    }

    /// Every job configuration submitted so far, in order.
    pub fn submitted_jobs(&self) -> Vec<JobConfiguration> {
        self.state
            .lock()
            .map(|s| s.submitted.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> BqResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| BigQueryError::Transport(anyhow::anyhow!("warehouse state poisoned: {e}")))
    }

    async fn execute(&self, configuration: &JobConfiguration) -> Result<(), ErrorProto> {
        match configuration {
            JobConfiguration::Load(job) => self.execute_load(job).await,
            JobConfiguration::Query(job) => self.execute_query(job),
            JobConfiguration::Copy(job) => self.execute_copy(job),
            JobConfiguration::Extract(job) => self.execute_extract(job).await,
        }
    }

    async fn execute_load(&self, job: &LoadJob) -> Result<(), ErrorProto> {
        if job.source_format != SourceFormat::NewlineDelimitedJson {
            return Err(job_error(
                "invalid",
                format!(
                    "source format {:?} is not supported in memory",
                    job.source_format
                ),
            ));
        }
        let fields = job.schema.as_ref().map(|s| s.fields.clone());

        let mut rows = Vec::new();
        let mut bad_records = 0u32;
        for uri in &job.source_uris {
            let text = self
                .storage
                .get_string(uri)
                .await
                .map_err(|e| job_error("notFound", format!("Not found: URI {uri} ({e:#})")))?;
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                match parse_row(line, fields.as_deref(), job.ignore_unknown_values) {
                    Some(row) => rows.push(row),
                    None => bad_records += 1,
                }
            }
        }
        if bad_records > job.max_bad_records {
            return Err(job_error(
                "invalid",
                format!(
                    "JSON table encountered too many errors: {bad_records} bad record(s), \
                     max allowed {}",
                    job.max_bad_records
                ),
            ));
        }

        let mut state = self.state.lock().map_err(poisoned)?;
        write_table(
            &mut state,
            &job.destination_table,
            fields,
            rows,
            job.create_disposition,
            job.write_disposition,
        )
    }

    fn execute_query(&self, job: &QueryJob) -> Result<(), ErrorProto> {
        if job.query.trim().is_empty() {
            return Err(job_error("invalid", "query is empty"));
        }
        let mut state = self.state.lock().map_err(poisoned)?;
        let rows = state
            .query_results
            .get(job.query.trim())
            .cloned()
            .unwrap_or_default();
        write_table(
            &mut state,
            &job.destination_table,
            None,
            rows,
            job.create_disposition,
            job.write_disposition,
        )
    }

    fn execute_copy(&self, job: &CopyJob) -> Result<(), ErrorProto> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let source = state
            .table(&job.source_table)
            .cloned()
            .ok_or_else(|| not_found_table(&job.source_table))?;
        write_table(
            &mut state,
            &job.destination_table,
            source.schema,
            source.rows,
            job.create_disposition,
            job.write_disposition,
        )
    }

    async fn execute_extract(&self, job: &ExtractJob) -> Result<(), ErrorProto> {
        if job.compression != crate::types::Compression::None {
            return Err(job_error(
                "invalid",
                format!("compression {:?} is not supported in memory", job.compression),
            ));
        }
        let source = {
            let state = self.state.lock().map_err(poisoned)?;
            state
                .table(&job.source_table)
                .cloned()
                .ok_or_else(|| not_found_table(&job.source_table))?
        };
        let content = match job.destination_format {
            DestinationFormat::NewlineDelimitedJson => source
                .rows
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
            DestinationFormat::Csv => render_csv(
                &source,
                job.field_delimiter.as_deref().unwrap_or(","),
                job.print_header.unwrap_or(true),
            ),
            other => {
                return Err(job_error(
                    "invalid",
                    format!("destination format {other:?} is not supported in memory"),
                ));
            }
        };
        for uri in &job.destination_uris {
            self.storage
                .put_string(&content, uri)
                .await
                .map_err(|e| job_error("invalid", format!("writing {uri}: {e:#}")))?;
        }
        Ok(())
    }
}

fn job_error(reason: &str, message: impl Into<String>) -> ErrorProto {
    ErrorProto {
        reason: reason.to_string(),
        message: message.into(),
        location: None,
    }
}

fn poisoned<T>(_: T) -> ErrorProto {
    job_error("internalError", "warehouse state poisoned")
}

fn not_found_table(r: &TableReference) -> ErrorProto {
    job_error(
        "notFound",
        format!("Not found: Table {}:{}.{}", r.project_id, r.dataset_id, r.table_id),
    )
}

/// Parse one JSON line. `None` marks a bad record.
fn parse_row(line: &str, fields: Option<&[SchemaField]>, ignore_unknown: bool) -> Option<Value> {
    let Ok(Value::Object(mut obj)) = serde_json::from_str::<Value>(line) else {
        return None;
    };
    if let Some(fields) = fields {
        if !record_accepts(fields, &obj, ignore_unknown) {
            return None;
        }
        obj.retain(|k, _| fields.iter().any(|f| &f.name == k));
    }
    Some(Value::Object(obj))
}

fn write_table(
    state: &mut State,
    dest: &TableReference,
    schema: Option<Vec<SchemaField>>,
    rows: Vec<Value>,
    create: CreateDisposition,
    write: WriteDisposition,
) -> Result<(), ErrorProto> {
    let dataset = state
        .dataset_mut(&dest.project_id, &dest.dataset_id)
        .ok_or_else(|| {
            job_error(
                "notFound",
                format!("Not found: Dataset {}:{}", dest.project_id, dest.dataset_id),
            )
        })?;

    let mut existing = match dataset.tables.entry(dest.table_id.clone()) {
        Entry::Occupied(entry) => entry,
        Entry::Vacant(entry) => {
            if create == CreateDisposition::CreateNever {
                return Err(not_found_table(dest));
            }
            entry.insert(TableState {
                schema,
                rows,
                view: None,
            });
            return Ok(());
        }
    };
    let existing = existing.get_mut();

    match write {
        WriteDisposition::WriteEmpty if !existing.rows.is_empty() => Err(job_error(
            "duplicate",
            format!(
                "Already Exists: Table {}:{}.{}",
                dest.project_id, dest.dataset_id, dest.table_id
            ),
        )),
        WriteDisposition::WriteEmpty | WriteDisposition::WriteTruncate => {
            *existing = TableState {
                schema,
                rows,
                view: None,
            };
            Ok(())
        }
        WriteDisposition::WriteAppend => {
            if existing.schema.is_none() {
                existing.schema = schema;
            }
            existing.rows.extend(rows);
            Ok(())
        }
    }
}

fn render_csv(table: &TableState, delimiter: &str, print_header: bool) -> String {
    let columns: Vec<String> = table.schema.as_ref().map_or_else(
        || {
            table
                .rows
                .first()
                .and_then(Value::as_object)
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default()
        },
        |fields| fields.iter().map(|f| f.name.clone()).collect(),
    );

    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    if print_header {
        let header: Vec<String> = columns.iter().map(|c| csv_cell(c, delimiter)).collect();
        lines.push(header.join(delimiter));
    }
    for row in &table.rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match row.get(c) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => csv_cell(s, delimiter),
                Some(other) => csv_cell(&other.to_string(), delimiter),
            })
            .collect();
        lines.push(cells.join(delimiter));
    }
    lines.join("\n")
}

/// Quote a cell holding the delimiter, a quote, or a line break; inner quotes are doubled.
fn csv_cell(value: &str, delimiter: &str) -> String {
    let needs_quotes = (!delimiter.is_empty() && value.contains(delimiter))
        || value.contains(['"', '\n', '\r']);
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn dataset_exists(&self, dataset: &BqDataset) -> BqResult<bool> {
        let state = self.lock()?;
        let Some(existing) = state.dataset(&dataset.project_id, &dataset.dataset_id) else {
            return Ok(false);
        };
        if let Some(expected) = &dataset.location
            && !expected.eq_ignore_ascii_case(&existing.location)
        {
            return Err(BigQueryError::LocationMismatch {
                dataset: dataset.to_string(),
                expected: expected.clone(),
                actual: existing.location.clone(),
            });
        }
        Ok(true)
    }

    async fn table_exists(&self, table: &BqTable) -> BqResult<bool> {
        if !self.dataset_exists(&table.dataset).await? {
            return Ok(false);
        }
        Ok(self.lock()?.table(&table.reference()).is_some())
    }

    async fn make_dataset(&self, dataset: &BqDataset, raise_if_exists: bool) -> BqResult<()> {
        let mut state = self.lock()?;
        let datasets = state
            .projects
            .entry(dataset.project_id.clone())
            .or_default();
        if datasets.contains_key(&dataset.dataset_id) {
            if raise_if_exists {
                return Err(BigQueryError::conflict(format!(
                    "Already Exists: Dataset {dataset}"
                )));
            }
            return Ok(());
        }
        datasets.insert(
            dataset.dataset_id.clone(),
            DatasetState {
                location: dataset
                    .location
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                tables: BTreeMap::new(),
            },
        );
        debug!(dataset = %dataset, "created in-memory dataset");
        Ok(())
    }

    async fn delete_dataset(&self, dataset: &BqDataset, delete_nonempty: bool) -> BqResult<()> {
        let mut state = self.lock()?;
        let Some(datasets) = state.projects.get_mut(&dataset.project_id) else {
            return Ok(());
        };
        let Some(existing) = datasets.get(&dataset.dataset_id) else {
            return Ok(());
        };
        if !existing.tables.is_empty() && !delete_nonempty {
            return Err(BigQueryError::Api {
                status: 400,
                reason: "resourceInUse".to_string(),
                message: format!("Dataset {dataset} is still in use"),
            });
        }
        datasets.remove(&dataset.dataset_id);
        Ok(())
    }

    async fn delete_table(&self, table: &BqTable) -> BqResult<()> {
        let mut state = self.lock()?;
        if let Some(dataset) = state.dataset_mut(table.project_id(), table.dataset_id()) {
            dataset.tables.remove(&table.table_id);
        }
        Ok(())
    }

    async fn list_datasets(&self, project_id: &str) -> BqResult<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .projects
            .get(project_id)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_tables(&self, dataset: &BqDataset) -> BqResult<Vec<String>> {
        let state = self.lock()?;
        state
            .dataset(&dataset.project_id, &dataset.dataset_id)
            .map(|d| d.tables.keys().cloned().collect())
            .ok_or_else(|| BigQueryError::not_found(format!("Not found: Dataset {dataset}")))
    }

    async fn get_view(&self, table: &BqTable) -> BqResult<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .table(&table.reference())
            .and_then(|t| t.view.clone()))
    }

    async fn update_view(&self, table: &BqTable, view: &str) -> BqResult<()> {
        let mut state = self.lock()?;
        let dataset = state
            .dataset_mut(table.project_id(), table.dataset_id())
            .ok_or_else(|| {
                BigQueryError::not_found(format!("Not found: Dataset {}", table.dataset))
            })?;
        dataset.tables.insert(
            table.table_id.clone(),
            TableState {
                schema: None,
                rows: Vec::new(),
                view: Some(view.to_string()),
            },
        );
        Ok(())
    }

    async fn insert_job(
        &self,
        project_id: &str,
        configuration: &JobConfiguration,
    ) -> BqResult<JobHandle> {
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        self.lock()?.submitted.push(configuration.clone());

        let error = self.execute(configuration).await.err();
        if let Some(err) = &error {
            debug!(
                job_id = %job_id,
                reason = %err.reason,
                message = %err.message,
                "in-memory job failed"
            );
        }
        self.lock()?
            .jobs
            .insert(job_id.clone(), JobState::Done { error });

        Ok(JobHandle {
            project_id: project_id.to_string(),
            job_id,
            location: None,
        })
    }

    async fn job_state(&self, job: &JobHandle) -> BqResult<JobState> {
        self.lock()?
            .jobs
            .get(&job.job_id)
            .cloned()
            .ok_or_else(|| BigQueryError::not_found(format!("Not found: Job {}", job.job_id)))
    }

    fn poll_interval(&self) -> Duration {
        Duration::ZERO
    }
}
