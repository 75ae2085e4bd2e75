//! `bq-tasks` command line: argument parsing and command execution.
//!
//! `main.rs` only sets up tracing, builds the REST client, and maps the
//! returned code to the process exit status.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::client::Warehouse;
use crate::config::BqTasksConfig;
use crate::executor::{RunOptions, run_tasks};
use crate::storage::StorageClient;
use crate::tasks::build_tasks;
use crate::types::{BqDataset, BqTable, TaskDefinition};

pub const USAGE: &str = "usage: bq-tasks run <definitions.json>
       bq-tasks exists <project:dataset.table>
       bq-tasks ls [project[:dataset]]";

/// Exit code when every task succeeded or was already complete.
pub const EXIT_OK: u8 = 0;
/// Exit code when at least one task failed or was skipped.
pub const EXIT_TASKS_FAILED: u8 = 1;
/// Exit code for unknown commands or missing arguments.
pub const EXIT_USAGE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(PathBuf),
    Exists(String),
    List(Option<String>),
}

impl Command {
    /// Parse the arguments after the program name; `None` means print usage.
    pub fn parse(args: &[String]) -> Option<Self> {
        match args {
            [cmd, path] if cmd == "run" => Some(Self::Run(PathBuf::from(path))),
            [cmd, table] if cmd == "exists" => Some(Self::Exists(table.clone())),
            [cmd] if cmd == "ls" => Some(Self::List(None)),
            [cmd, scope] if cmd == "ls" => Some(Self::List(Some(scope.clone()))),
            _ => None,
        }
    }
}

/// What `ls` lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    Datasets(String),
    Tables(BqDataset),
}

impl ListScope {
    /// `project` lists datasets, `project:dataset` lists tables. Without an
    /// argument the configured default project is used.
    pub fn parse(scope: Option<&str>, default_project: Option<&str>) -> Result<Self> {
        let Some(scope) = scope.or(default_project) else {
            bail!("no project given and GOOGLE_CLOUD_PROJECT is not set");
        };
        match scope.split_once(':') {
            Some((project, dataset)) if !project.is_empty() && !dataset.is_empty() => {
                Ok(Self::Tables(BqDataset::new(project, dataset)))
            }
            Some(_) => bail!("invalid dataset reference '{scope}', expected project:dataset"),
            None if scope.is_empty() => bail!("empty project id"),
            None => Ok(Self::Datasets(scope.to_string())),
        }
    }
}

/// Execute `command`, writing results to `out`. Returns the process exit code.
pub async fn execute(
    command: Command,
    config: &BqTasksConfig,
    client: Arc<dyn Warehouse>,
    storage: Arc<StorageClient>,
    out: &mut (dyn Write + Send),
) -> Result<u8> {
    match command {
        Command::Run(path) => run(config, client, storage, &path, out).await,
        Command::Exists(table) => {
            let table: BqTable = table.parse().map_err(anyhow::Error::msg)?;
            writeln!(out, "{}", client.table_exists(&table).await?)?;
            Ok(EXIT_OK)
        }
        Command::List(scope) => {
            let ids = match ListScope::parse(scope.as_deref(), config.project_id.as_deref())? {
                ListScope::Datasets(project) => client.list_datasets(&project).await?,
                ListScope::Tables(dataset) => client.list_tables(&dataset).await?,
            };
            for id in ids {
                writeln!(out, "{id}")?;
            }
            Ok(EXIT_OK)
        }
    }
}

async fn run(
    config: &BqTasksConfig,
    client: Arc<dyn Warehouse>,
    storage: Arc<StorageClient>,
    path: &std::path::Path,
    out: &mut (dyn Write + Send),
) -> Result<u8> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let definitions: Vec<TaskDefinition> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), tasks = definitions.len(), "loaded task definitions");

    let tasks = build_tasks(&definitions, &client, &storage)?;
    let options = RunOptions {
        fail_fast: config.fail_fast,
    };
    let report = run_tasks(&tasks, options).await?;

    for failed in report.failed() {
        writeln!(out, "FAILED {}: {:?}", failed.task_id, failed.status)?;
    }
    writeln!(out, "{}", report.summary())?;
    Ok(if report.success() {
        EXIT_OK
    } else {
        EXIT_TASKS_FAILED
    })
}
