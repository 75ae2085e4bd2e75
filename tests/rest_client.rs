//! REST client behaviour against a mocked BigQuery API.

#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use wiremock::matchers::{
    body_partial_json, header, method, path, path_regex, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bq_tasks::client::{BigQueryClient, StaticTokenSource, Warehouse};
use bq_tasks::config::BqTasksConfig;
use bq_tasks::error::BigQueryError;
use bq_tasks::types::{BqDataset, BqTable, CreateDisposition, WriteDisposition};

fn client(server: &MockServer) -> BigQueryClient {
    let config = BqTasksConfig {
        api_url: server.uri(),
        poll_interval: Duration::ZERO,
        max_retries: 2,
        retry_base_delay: Duration::from_millis(1),
        ..BqTasksConfig::default()
    };
    BigQueryClient::new(&config, Arc::new(StaticTokenSource("test-token".to_string())))
}

fn not_found(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": {
            "code": 404,
            "message": message,
            "errors": [{"reason": "notFound", "message": message}]
        }
    }))
}

async fn dataset_found(server: &MockServer, location: &str) {
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"location": location})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn table_exists_sends_bearer_token() -> Result<()> {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d/tables/t"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "p:d.t"})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client(&server).exists("p", "d", "t").await?);
    Ok(())
}

#[tokio::test]
async fn missing_table_and_dataset_are_false() -> Result<()> {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d/tables/gone"))
        .respond_with(not_found("Not found: Table p:d.gone"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/nope"))
        .respond_with(not_found("Not found: Dataset p:nope"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/nope/tables/t"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(!client.table_exists(&BqTable::new("p", "d", "gone")).await?);
    assert!(!client.table_exists(&BqTable::new("p", "nope", "t")).await?);
    Ok(())
}

#[tokio::test]
async fn dataset_in_another_location_is_an_error() {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;

    let dataset = BqDataset::new("p", "d").with_location("EU");
    let err = client(&server).dataset_exists(&dataset).await.err();
    assert!(
        matches!(err, Some(BigQueryError::LocationMismatch { ref actual, .. }) if actual == "US"),
        "{err:?}"
    );
}

#[tokio::test]
async fn deletes_ignore_missing_objects() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/projects/p/datasets/d/tables/t"))
        .respond_with(not_found("Not found: Table p:d.t"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/projects/p/datasets/d"))
        .and(query_param("deleteContents", "true"))
        .respond_with(not_found("Not found: Dataset p:d"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.delete_table(&BqTable::new("p", "d", "t")).await?;
    client.delete_dataset(&BqDataset::new("p", "d"), true).await?;
    Ok(())
}

#[tokio::test]
async fn make_dataset_conflict_is_ignored_unless_raising() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/p/datasets"))
        .and(body_partial_json(json!({"datasetReference": {"projectId": "p", "datasetId": "d"}})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"message": "Already Exists: Dataset p:d", "errors": [{"reason": "duplicate"}]}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let dataset = BqDataset::new("p", "d");
    client.make_dataset(&dataset, false).await?;
    let err = client.make_dataset(&dataset, true).await.err();
    assert!(err.is_some_and(|e| e.is_conflict()));
    Ok(())
}

#[tokio::test]
async fn listings_follow_page_tokens() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d/tables"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tables": [{"tableReference": {"projectId": "p", "datasetId": "d", "tableId": "a"}}],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d/tables"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tables": [{"tableReference": {"projectId": "p", "datasetId": "d", "tableId": "b"}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "datasets": [
                {"datasetReference": {"projectId": "p", "datasetId": "d"}},
                {"datasetReference": {"projectId": "p", "datasetId": "luigi_tests"}}
            ]
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(client.list_tables(&BqDataset::new("p", "d")).await?, ["a", "b"]);
    assert_eq!(client.list_datasets("p").await?, ["d", "luigi_tests"]);
    Ok(())
}

#[tokio::test]
async fn copy_polls_until_done() -> Result<()> {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;
    Mock::given(method("POST"))
        .and(path("/projects/p/jobs"))
        .and(body_partial_json(json!({"configuration": {"copy": {
            "sourceTable": {"projectId": "p", "datasetId": "d", "tableId": "t"},
            "destinationTable": {"projectId": "p", "datasetId": "d", "tableId": "t_copy"},
            "createDisposition": "CREATE_IF_NEEDED",
            "writeDisposition": "WRITE_TRUNCATE"
        }}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
            "status": {"state": "PENDING"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/jobs/job_1"))
        .and(query_param("location", "US"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
            "status": {"state": "RUNNING"}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/jobs/job_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
            "status": {"state": "DONE"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job_id = client(&server)
        .copy(
            &BqTable::new("p", "d", "t"),
            &BqTable::new("p", "d", "t_copy"),
            CreateDisposition::CreateIfNeeded,
            WriteDisposition::WriteTruncate,
        )
        .await?;
    assert_eq!(job_id, "job_1");
    Ok(())
}

#[tokio::test]
async fn failed_job_surfaces_error_result() {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;
    Mock::given(method("POST"))
        .and(path("/projects/p/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "p", "jobId": "job_2"},
            "status": {"state": "RUNNING"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/p/jobs/job_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "p", "jobId": "job_2"},
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "notFound", "message": "Not found: Table p:d.t"}
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .copy(
            &BqTable::new("p", "d", "t"),
            &BqTable::new("p", "d", "t_copy"),
            CreateDisposition::CreateIfNeeded,
            WriteDisposition::WriteTruncate,
        )
        .await
        .err();
    assert!(
        matches!(err, Some(BigQueryError::Execution { ref job_id, ref reason, .. })
            if job_id == "job_2" && reason == "notFound"),
        "{err:?}"
    );
}

#[tokio::test]
async fn retryable_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "try later", "errors": [{"reason": "backendError"}]}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    dataset_found(&server, "US").await;

    assert!(client(&server).dataset_exists(&BqDataset::new("p", "d")).await?);
    Ok(())
}

#[tokio::test]
async fn retried_job_insert_reuses_its_job_id() -> Result<()> {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;
    Mock::given(method("POST"))
        .and(path("/projects/p/jobs"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"message": "try later", "errors": [{"reason": "backendError"}]}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    // The first attempt was accepted before the 503, so the retry conflicts.
    Mock::given(method("POST"))
        .and(path("/projects/p/jobs"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"message": "Already Exists: Job p:job", "errors": [{"reason": "duplicate"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/projects/p/jobs/job_[0-9a-f]{32}$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "p", "jobId": "ignored"},
            "status": {"state": "DONE"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job_id = client(&server)
        .copy(
            &BqTable::new("p", "d", "t"),
            &BqTable::new("p", "d", "t_copy"),
            CreateDisposition::CreateIfNeeded,
            WriteDisposition::WriteAppend,
        )
        .await?;

    let inserts: Vec<serde_json::Value> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice::<serde_json::Value>(&r.body))
        .collect::<Result<_, _>>()?;
    assert_eq!(inserts.len(), 2);
    let sent: Vec<&str> = inserts
        .iter()
        .filter_map(|body| body["jobReference"]["jobId"].as_str())
        .collect();
    assert_eq!(sent, [job_id.as_str(), job_id.as_str()]);
    Ok(())
}

#[tokio::test]
async fn permission_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"message": "Access Denied", "errors": [{"reason": "accessDenied"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).dataset_exists(&BqDataset::new("p", "d")).await.err();
    assert!(
        matches!(
            err,
            Some(BigQueryError::Api { status: 403, ref reason, .. }) if reason == "accessDenied"
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn update_view_creates_missing_table() -> Result<()> {
    let server = MockServer::start().await;
    dataset_found(&server, "US").await;
    Mock::given(method("GET"))
        .and(path("/projects/p/datasets/d/tables/v"))
        .respond_with(not_found("Not found: Table p:d.v"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/p/datasets/d/tables"))
        .and(body_partial_json(json!({
            "tableReference": {"tableId": "v"},
            "view": {"query": "SELECT 1"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .update_view(&BqTable::new("p", "d", "v"), "SELECT 1")
        .await?;
    Ok(())
}
