//! Run a task graph in dependency order.
//!
//! Tasks run one at a time, level by level. A task is skipped when any of its
//! dependencies did not end up complete; with `fail_fast`, everything after the
//! first failure is skipped.

pub mod dag;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::tasks::Task;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    AlreadyComplete,
    Failed(String),
    Skipped,
}

impl TaskStatus {
    /// The task's output can be relied on by dependents.
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyComplete)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Per-task outcome, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.status.is_done())
    }

    pub fn status(&self, task_id: &str) -> Option<&TaskStatus> {
        self.results
            .iter()
            .find(|r| r.task_id == task_id)
            .map(|r| &r.status)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Failed(_)))
    }

    /// e.g. `3 tasks: 1 success, 1 already complete, 0 failed, 1 skipped`
    pub fn summary(&self) -> String {
        let mut success = 0;
        let mut complete = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for result in &self.results {
            match result.status {
                TaskStatus::Success => success += 1,
                TaskStatus::AlreadyComplete => complete += 1,
                TaskStatus::Failed(_) => failed += 1,
                TaskStatus::Skipped => skipped += 1,
            }
        }
        format!(
            "{} task{}: {success} success, {complete} already complete, {failed} failed, \
             {skipped} skipped",
            self.results.len(),
            if self.results.len() == 1 { "" } else { "s" }
        )
    }
}

/// Run `roots` and everything they require.
///
/// Returns `Err` only when the graph itself is unusable (a cycle); task
/// failures are reported per task in the [`RunReport`].
pub async fn run_tasks(roots: &[Arc<dyn Task>], options: RunOptions) -> Result<RunReport> {
    let (tasks, deps) = dag::collect_graph(roots);
    let levels = dag::topological_levels(&deps)?;
    let total = tasks.len();

    let mut statuses: BTreeMap<String, TaskStatus> = BTreeMap::new();
    let mut report = RunReport::default();
    let mut had_failure = false;
    let mut counter = 0usize;

    for task_id in levels.iter().flatten() {
        counter += 1;
        let Some(task) = tasks.get(task_id) else {
            continue;
        };

        let status = if options.fail_fast && had_failure {
            info!("{counter} of {total} SKIP {task_id} (fail_fast)");
            TaskStatus::Skipped
        } else if deps
            .get(task_id)
            .into_iter()
            .flatten()
            .any(|dep| !statuses.get(dep).is_some_and(TaskStatus::is_done))
        {
            warn!("{counter} of {total} SKIP {task_id}: upstream dependency not complete");
            TaskStatus::Skipped
        } else {
            execute(task.as_ref(), counter, total).await
        };

        if matches!(status, TaskStatus::Failed(_)) {
            had_failure = true;
        }
        statuses.insert(task_id.clone(), status.clone());
        report.results.push(TaskResult {
            task_id: task_id.clone(),
            status,
        });
    }

    info!("{}", report.summary());
    Ok(report)
}

async fn execute(task: &dyn Task, counter: usize, total: usize) -> TaskStatus {
    let task_id = task.task_id();
    match task.complete().await {
        Ok(true) => {
            info!("{counter} of {total} COMPLETE {task_id}");
            return TaskStatus::AlreadyComplete;
        }
        Ok(false) => {}
        Err(e) => {
            error!("{counter} of {total} ERROR checking {task_id}: {e:#}");
            return TaskStatus::Failed(format!("checking completion: {e:#}"));
        }
    }

    info!("{counter} of {total} START {task_id}");
    let start = std::time::Instant::now();
    match task.run().await {
        Ok(()) => {
            info!(
                "{counter} of {total} OK {task_id} in {:.2}s",
                start.elapsed().as_secs_f64()
            );
            TaskStatus::Success
        }
        Err(e) => {
            error!("{counter} of {total} ERROR {task_id}: {e:#}");
            TaskStatus::Failed(format!("{e:#}"))
        }
    }
}
