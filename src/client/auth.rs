use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Supplies bearer tokens for REST calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Application default credentials (service account file, gcloud user
/// credentials, or the metadata server), resolved by `gcp_auth`.
pub struct GoogleTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl std::fmt::Debug for GoogleTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleTokenSource").finish_non_exhaustive()
    }
}

impl GoogleTokenSource {
    pub async fn from_environment() -> Result<Self> {
        let provider = gcp_auth::provider()
            .await
            .context("resolving Google application default credentials")?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl TokenSource for GoogleTokenSource {
    async fn token(&self) -> Result<String> {
        let token = self
            .provider
            .token(&[BIGQUERY_SCOPE])
            .await
            .context("fetching BigQuery access token")?;
        Ok(token.as_str().to_string())
    }
}

/// A fixed token, for emulators and tests.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
