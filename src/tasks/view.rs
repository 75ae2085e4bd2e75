use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::info;

use super::Task;
use crate::target::{BigQueryTarget, Target};

/// Create or replace a view. Complete only when the stored definition matches.
#[derive(Debug, Clone)]
pub struct CreateViewTask {
    target: BigQueryTarget,
    view: String,
    requires: Vec<Arc<dyn Task>>,
}

impl CreateViewTask {
    pub fn new(target: BigQueryTarget, view: impl Into<String>) -> Self {
        Self {
            target,
            view: view.into(),
            requires: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_requires(mut self, requires: Vec<Arc<dyn Task>>) -> Self {
        self.requires = requires;
        self
    }

    pub fn view(&self) -> &str {
        &self.view
    }
}

#[async_trait]
impl Task for CreateViewTask {
    fn task_id(&self) -> String {
        super::task_id("CreateViewTask", &self.target)
    }

    fn output(&self) -> Arc<dyn Target> {
        Arc::new(self.target.clone())
    }

    fn requires(&self) -> Vec<Arc<dyn Task>> {
        self.requires.clone()
    }

    async fn complete(&self) -> Result<bool> {
        if !self.target.exists().await? {
            return Ok(false);
        }
        let current = self.target.client.get_view(&self.target.table).await?;
        Ok(current.is_some_and(|q| q.trim() == self.view.trim()))
    }

    async fn run(&self) -> Result<()> {
        let table = &self.target.table;
        if self.view.trim().is_empty() {
            bail!("view definition for {table} is empty");
        }
        info!(table = %table, "updating view");
        self.target
            .client
            .update_view(table, &self.view)
            .await
            .with_context(|| format!("updating view {table}"))?;
        Ok(())
    }
}
