use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::Task;
use crate::target::{BigQueryTarget, Target};

/// A table produced outside this process. Complete iff it exists; never runnable.
#[derive(Debug, Clone)]
pub struct ExternalTableTask {
    target: BigQueryTarget,
}

impl ExternalTableTask {
    pub const fn new(target: BigQueryTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Task for ExternalTableTask {
    fn task_id(&self) -> String {
        super::task_id("ExternalTableTask", &self.target)
    }

    fn output(&self) -> Arc<dyn Target> {
        Arc::new(self.target.clone())
    }

    async fn run(&self) -> Result<()> {
        bail!(
            "external table {} does not exist and cannot be produced by this run",
            self.target.table
        )
    }
}
