//! Tasks: units of work with a declared output.
//!
//! A task is complete when its output exists. Tasks can be run directly
//! (`task.run().await`) or as a graph through [`crate::executor::run_tasks`].

pub mod build;
pub mod external;
pub mod extract;
pub mod load;
pub mod query;
pub mod view;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::target::Target;

pub use self::build::build_tasks;
pub use self::external::ExternalTableTask;
pub use self::extract::ExtractTask;
pub use self::load::LoadTask;
pub use self::query::RunQueryTask;
pub use self::view::CreateViewTask;

#[async_trait]
pub trait Task: Send + Sync + std::fmt::Debug {
    /// Stable identity; two tasks with the same id are the same task.
    fn task_id(&self) -> String;

    fn output(&self) -> Arc<dyn Target>;

    /// Tasks that must be complete before this one runs.
    fn requires(&self) -> Vec<Arc<dyn Task>> {
        Vec::new()
    }

    async fn complete(&self) -> Result<bool> {
        self.output().exists().await
    }

    /// Perform the task's side effect, returning once it has finished.
    async fn run(&self) -> Result<()>;
}

/// `Kind(output)`, the id format shared by the built-in tasks.
pub(crate) fn task_id(kind: &str, output: &dyn Target) -> String {
    format!("{kind}({})", output.describe())
}
