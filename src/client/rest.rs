use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use super::auth::{GoogleTokenSource, TokenSource};
use super::{BqResult, Warehouse};
use crate::config::BqTasksConfig;
use crate::error::BigQueryError;
use crate::types::{
    BqDataset, BqTable, DatasetReference, ErrorProto, JobConfiguration, JobHandle, JobState,
    TableReference,
};

/// BigQuery v2 REST client.
pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    api_url: String,
    location: Option<String>,
    poll_interval: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("api_url", &self.api_url)
            .field("location", &self.location)
            .field("poll_interval", &self.poll_interval)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl BigQueryClient {
    pub fn new(config: &BqTasksConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            location: config.location.clone(),
            poll_interval: config.poll_interval,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }

    /// Build a client authenticated with application default credentials.
    pub async fn from_config(config: &BqTasksConfig) -> anyhow::Result<Self> {
        let tokens = GoogleTokenSource::from_environment().await?;
        Ok(Self::new(config, Arc::new(tokens)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    /// Send a request, retrying retryable failures with exponential backoff.
    ///
    /// `build` is called once per attempt because `RequestBuilder` is consumed.
    async fn send<F>(&self, build: F) -> BqResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let result = self.send_once(&build).await;
            match result {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    warn!(attempt, error = %err, ?delay, "retrying BigQuery request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once<F>(&self, build: &F) -> BqResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.token().await?;
        let response = build(&self.http).bearer_auth(token).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(api_error(response).await)
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> BqResult<T> {
        let url = self.url(path);
        let response = self
            .send(|http| http.get(&url).query(query))
            .await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &serde_json::Value,
    ) -> BqResult<T> {
        let url = self.url(path);
        let response = self
            .send(|http| http.request(method.clone(), &url).json(body))
            .await?;
        Ok(response.json::<T>().await?)
    }

    async fn delete(&self, path: &str, query: &[(&str, String)]) -> BqResult<()> {
        let url = self.url(path);
        self.send(|http| http.delete(&url).query(query)).await?;
        Ok(())
    }

    /// Collect every page of a list endpoint.
    async fn list_pages<P, F>(&self, path: &str, mut take: F) -> BqResult<Vec<String>>
    where
        P: DeserializeOwned + Paged + Send,
        F: FnMut(P) -> Vec<String> + Send,
    {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = Vec::new();
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: P = self.get_json(path, &query).await?;
            page_token = page.next_page_token();
            ids.extend(take(page));
            if page_token.is_none() {
                return Ok(ids);
            }
        }
    }

    async fn get_table(&self, table: &BqTable) -> BqResult<Option<TableResource>> {
        match self.get_json::<TableResource>(&table_path(table), &[]).await {
            Ok(resource) => Ok(Some(resource)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn api_error(response: Response) -> BigQueryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<ErrorEnvelope>(&body).ok();
    let (reason, message) = parsed.map_or_else(
        || (status_reason(status), body.clone()),
        |envelope| {
            let reason = envelope
                .error
                .errors
                .first()
                .map(|e| e.reason.clone())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| status_reason(status));
            (reason, envelope.error.message)
        },
    );
    BigQueryError::Api {
        status: status.as_u16(),
        reason,
        message,
    }
}

fn status_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unknown")
        .to_string()
}

fn dataset_path(project_id: &str, dataset_id: &str) -> String {
    format!("/projects/{project_id}/datasets/{dataset_id}")
}

fn table_path(table: &BqTable) -> String {
    format!(
        "{}/tables/{}",
        dataset_path(table.project_id(), table.dataset_id()),
        table.table_id
    )
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct DatasetResource {
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewDefinition {
    query: String,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    view: Option<ViewDefinition>,
}

trait Paged {
    fn next_page_token(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListEntry>,
    next_page_token: Option<String>,
}

impl Paged for DatasetList {
    fn next_page_token(&self) -> Option<String> {
        self.next_page_token.clone().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    next_page_token: Option<String>,
}

impl Paged for TableList {
    fn next_page_token(&self) -> Option<String> {
        self.next_page_token.clone().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    status: JobStatus,
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn dataset_exists(&self, dataset: &BqDataset) -> BqResult<bool> {
        let path = dataset_path(&dataset.project_id, &dataset.dataset_id);
        let resource = match self.get_json::<DatasetResource>(&path, &[]).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if let (Some(expected), Some(actual)) = (&dataset.location, &resource.location)
            && !expected.eq_ignore_ascii_case(actual)
        {
            return Err(BigQueryError::LocationMismatch {
                dataset: dataset.to_string(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
        Ok(true)
    }

    async fn table_exists(&self, table: &BqTable) -> BqResult<bool> {
        if !self.dataset_exists(&table.dataset).await? {
            return Ok(false);
        }
        Ok(self.get_table(table).await?.is_some())
    }

    async fn make_dataset(&self, dataset: &BqDataset, raise_if_exists: bool) -> BqResult<()> {
        let mut body = json!({ "datasetReference": DatasetReference::from(dataset) });
        if let Some(location) = dataset.location.as_ref().or(self.location.as_ref()) {
            body["location"] = json!(location);
        }
        let path = format!("/projects/{}/datasets", dataset.project_id);
        match self
            .send_json::<serde_json::Value>(Method::POST, &path, &body)
            .await
        {
            Ok(_) => {
                info!(dataset = %dataset, "created dataset");
                Ok(())
            }
            Err(e) if e.is_conflict() && !raise_if_exists => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_dataset(&self, dataset: &BqDataset, delete_nonempty: bool) -> BqResult<()> {
        let path = dataset_path(&dataset.project_id, &dataset.dataset_id);
        let query = [("deleteContents", delete_nonempty.to_string())];
        match self.delete(&path, &query).await {
            Ok(()) => {
                info!(dataset = %dataset, "deleted dataset");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_table(&self, table: &BqTable) -> BqResult<()> {
        match self.delete(&table_path(table), &[]).await {
            Ok(()) => {
                info!(table = %table, "deleted table");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_datasets(&self, project_id: &str) -> BqResult<Vec<String>> {
        let path = format!("/projects/{project_id}/datasets");
        self.list_pages(&path, |page: DatasetList| {
            page.datasets
                .into_iter()
                .map(|d| d.dataset_reference.dataset_id)
                .collect()
        })
        .await
    }

    async fn list_tables(&self, dataset: &BqDataset) -> BqResult<Vec<String>> {
        let path = format!(
            "{}/tables",
            dataset_path(&dataset.project_id, &dataset.dataset_id)
        );
        self.list_pages(&path, |page: TableList| {
            page.tables
                .into_iter()
                .map(|t| t.table_reference.table_id)
                .collect()
        })
        .await
    }

    async fn get_view(&self, table: &BqTable) -> BqResult<Option<String>> {
        Ok(self
            .get_table(table)
            .await?
            .and_then(|t| t.view)
            .map(|v| v.query))
    }

    async fn update_view(&self, table: &BqTable, view: &str) -> BqResult<()> {
        let body = json!({
            "tableReference": table.reference(),
            "view": { "query": view },
        });
        if self.table_exists(table).await? {
            self.send_json::<serde_json::Value>(Method::PUT, &table_path(table), &body)
                .await?;
        } else {
            let path = format!(
                "{}/tables",
                dataset_path(table.project_id(), table.dataset_id())
            );
            self.send_json::<serde_json::Value>(Method::POST, &path, &body)
                .await?;
        }
        info!(table = %table, "updated view");
        Ok(())
    }

    async fn insert_job(
        &self,
        project_id: &str,
        configuration: &JobConfiguration,
    ) -> BqResult<JobHandle> {
        // A client-chosen id makes retried inserts idempotent: the service
        // answers 409 when an earlier attempt was already accepted.
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        let mut reference = json!({ "projectId": project_id, "jobId": job_id });
        if let Some(location) = &self.location {
            reference["location"] = json!(location);
        }
        let body = json!({ "configuration": configuration, "jobReference": reference });
        let path = format!("/projects/{project_id}/jobs");
        match self.send_json::<JobResource>(Method::POST, &path, &body).await {
            Ok(job) => Ok(JobHandle {
                project_id: job.job_reference.project_id,
                job_id: job.job_reference.job_id,
                location: job.job_reference.location,
            }),
            Err(e) if e.is_conflict() => {
                info!(job_id = %job_id, "job already accepted by an earlier attempt");
                Ok(JobHandle {
                    project_id: project_id.to_string(),
                    job_id,
                    location: self.location.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn job_state(&self, job: &JobHandle) -> BqResult<JobState> {
        let path = format!("/projects/{}/jobs/{}", job.project_id, job.job_id);
        let query: Vec<(&str, String)> = job
            .location
            .iter()
            .map(|l| ("location", l.clone()))
            .collect();
        let resource: JobResource = self.get_json(&path, &query).await?;
        Ok(JobState::from_rest(
            &resource.status.state,
            resource.status.error_result,
        ))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
