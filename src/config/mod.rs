pub mod env;

use std::time::Duration;

use self::env::{env_or, parse_env_bool, parse_env_u32, parse_env_u64};

pub const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Configuration for the BigQuery client and task runner, read from environment variables.
#[derive(Debug, Clone)]
pub struct BqTasksConfig {
    /// Default project for listings. Controlled by `GOOGLE_CLOUD_PROJECT`.
    pub project_id: Option<String>,
    /// REST base URL. Controlled by `BIGQUERY_API_URL`.
    pub api_url: String,
    /// Location datasets are expected in / created in. Controlled by `BIGQUERY_LOCATION`.
    pub location: Option<String>,
    /// Delay between job status polls.
    /// Controlled by `BQ_JOB_POLL_INTERVAL_MS` (default: 5000).
    pub poll_interval: Duration,
    /// How many times a retryable request is repeated.
    /// Controlled by `BQ_MAX_RETRIES` (default: 3).
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    /// Controlled by `BQ_RETRY_BASE_DELAY_MS` (default: 500).
    pub retry_base_delay: Duration,
    /// Skip every remaining task after the first failure.
    /// Controlled by `BQ_FAIL_FAST` (default: false).
    pub fail_fast: bool,
}

impl Default for BqTasksConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            api_url: DEFAULT_API_URL.to_string(),
            location: None,
            poll_interval: Duration::from_secs(5),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            fail_fast: false,
        }
    }
}

impl BqTasksConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            project_id: std::env::var("GOOGLE_CLOUD_PROJECT")
                .ok()
                .filter(|v| !v.is_empty()),
            api_url: env_or("BIGQUERY_API_URL", DEFAULT_API_URL),
            location: std::env::var("BIGQUERY_LOCATION")
                .ok()
                .filter(|v| !v.is_empty()),
            poll_interval: Duration::from_millis(parse_env_u64(
                "BQ_JOB_POLL_INTERVAL_MS",
                5000,
            )?),
            max_retries: parse_env_u32("BQ_MAX_RETRIES", 3)?,
            retry_base_delay: Duration::from_millis(parse_env_u64(
                "BQ_RETRY_BASE_DELAY_MS",
                500,
            )?),
            fail_fast: parse_env_bool("BQ_FAIL_FAST", false)?,
        })
    }
}
