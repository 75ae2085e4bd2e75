//! Load/copy/list and run-query scenarios against live BigQuery.

use anyhow::Result;

use super::infra::shared_infra;
use crate::scenarios::{self, TestIdentity, init_tracing};

#[tokio::test(flavor = "current_thread")]
async fn test_load_and_copy() -> Result<()> {
    init_tracing();
    let fx = shared_infra().fixture().await?;
    let identity = TestIdentity::new(concat!(module_path!(), "::test_load_and_copy"));
    scenarios::load_and_copy(&fx, &identity).await
}

#[tokio::test(flavor = "current_thread")]
async fn test_run_query() -> Result<()> {
    init_tracing();
    let fx = shared_infra().fixture().await?;
    let identity = TestIdentity::new(concat!(module_path!(), "::test_run_query"));
    scenarios::run_query(&fx, &identity).await
}
