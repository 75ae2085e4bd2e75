use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use super::{CreateViewTask, ExternalTableTask, ExtractTask, LoadTask, RunQueryTask, Task};
use crate::client::Warehouse;
use crate::executor::dag::topological_levels;
use crate::storage::StorageClient;
use crate::target::BigQueryTarget;
use crate::types::{BqTable, TaskDefinition, WriteDisposition};

/// Turn definitions into tasks, wiring `requires` by definition name.
///
/// Returns one task per definition, in definition order. Unknown or duplicate
/// names and dependency cycles are errors.
pub fn build_tasks(
    definitions: &[TaskDefinition],
    warehouse: &Arc<dyn Warehouse>,
    storage: &Arc<StorageClient>,
) -> Result<Vec<Arc<dyn Task>>> {
    let mut by_name: BTreeMap<&str, &TaskDefinition> = BTreeMap::new();
    for def in definitions {
        if by_name.insert(def.name(), def).is_some() {
            bail!("duplicate task name '{}'", def.name());
        }
    }

    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for def in definitions {
        for required in def.requires() {
            if !by_name.contains_key(required.as_str()) {
                bail!("task '{}' requires unknown task '{required}'", def.name());
            }
        }
        deps.insert(def.name().to_string(), def.requires().iter().cloned().collect());
    }
    let levels = topological_levels(&deps).context("resolving task requirements")?;

    let mut built: BTreeMap<String, Arc<dyn Task>> = BTreeMap::new();
    for name in levels.iter().flatten() {
        let Some(def) = by_name.get(name.as_str()) else {
            continue;
        };
        let requires: Vec<Arc<dyn Task>> = def
            .requires()
            .iter()
            .filter_map(|r| built.get(r).cloned())
            .collect();
        let task = build_one(def, requires, warehouse, storage)
            .with_context(|| format!("building task '{name}'"))?;
        built.insert(name.clone(), task);
    }

    Ok(definitions
        .iter()
        .filter_map(|def| built.get(def.name()).cloned())
        .collect())
}

fn build_one(
    def: &TaskDefinition,
    requires: Vec<Arc<dyn Task>>,
    warehouse: &Arc<dyn Warehouse>,
    storage: &Arc<StorageClient>,
) -> Result<Arc<dyn Task>> {
    let table: BqTable = def.table().parse().map_err(anyhow::Error::msg)?;
    let target = BigQueryTarget::new(table, Arc::clone(warehouse));

    let task: Arc<dyn Task> = match def {
        TaskDefinition::Load(d) => {
            let mut task = LoadTask::new(target, d.source_uris.clone())
                .with_schema(d.schema.clone())
                .with_source_format(d.source_format)
                .with_encoding(d.encoding)
                .with_write_disposition(d.write_disposition.unwrap_or(WriteDisposition::WriteEmpty))
                .with_create_disposition(d.create_disposition)
                .with_max_bad_records(d.max_bad_records)
                .with_ignore_unknown_values(d.ignore_unknown_values)
                .with_requires(requires);
            if d.field_delimiter.is_some()
                || d.skip_leading_rows.is_some()
                || d.allow_jagged_rows
                || d.allow_quoted_newlines
            {
                task = task.with_csv_options(
                    d.field_delimiter.as_deref().unwrap_or(","),
                    d.skip_leading_rows.unwrap_or(0),
                    d.allow_jagged_rows,
                    d.allow_quoted_newlines,
                );
            }
            Arc::new(task)
        }
        TaskDefinition::Query(d) => Arc::new(
            RunQueryTask::new(target, d.query.clone())
                .with_priority(d.priority)
                .with_write_disposition(
                    d.write_disposition.unwrap_or(WriteDisposition::WriteTruncate),
                )
                .with_create_disposition(d.create_disposition)
                .with_flatten_results(d.flatten_results)
                .with_legacy_sql(d.use_legacy_sql)
                .with_udf_resource_uris(d.udf_resource_uris.clone())
                .with_requires(requires),
        ),
        TaskDefinition::View(d) => {
            Arc::new(CreateViewTask::new(target, d.view.clone()).with_requires(requires))
        }
        TaskDefinition::Extract(d) => Arc::new(
            ExtractTask::new(target, d.destination_uris.clone(), Arc::clone(storage))?
                .with_destination_format(d.destination_format)
                .with_compression(d.compression)
                .with_csv_options(d.field_delimiter.clone(), d.print_header)
                .with_requires(requires),
        ),
        TaskDefinition::External(_) => Arc::new(ExternalTableTask::new(target)),
    };
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryWarehouse;

    fn setup() -> (Arc<dyn Warehouse>, Arc<StorageClient>) {
        let storage = Arc::new(StorageClient::in_memory("bucket"));
        let warehouse: Arc<dyn Warehouse> = Arc::new(InMemoryWarehouse::new(Arc::clone(&storage)));
        (warehouse, storage)
    }

    fn parse(json: &str) -> Vec<TaskDefinition> {
        serde_json::from_str(json).unwrap_or_default()
    }

    #[test]
    fn requires_are_wired_by_name() -> Result<()> {
        let (warehouse, storage) = setup();
        let defs = parse(
            r#"[
                {"type": "query", "table": "p:d.summary", "requires": ["raw"], "query": "SELECT 1"},
                {"type": "load", "name": "raw", "table": "p:d.raw",
                 "source_uris": ["gs://b/raw.json"]},
                {"type": "extract", "table": "p:d.summary", "requires": ["p:d.summary"],
                 "name": "export", "destination_uris": ["memory://bucket/summary.csv"]}
            ]"#,
        );
        assert_eq!(defs.len(), 3);
        let tasks = build_tasks(&defs, &warehouse, &storage)?;

        let ids: Vec<String> = tasks.iter().map(|t| t.task_id()).collect();
        assert_eq!(
            ids,
            [
                "RunQueryTask(p:d.summary)",
                "LoadTask(p:d.raw)",
                "ExtractTask(p:d.summary -> memory://bucket/summary.csv)",
            ]
        );
        let query_requires: Vec<String> =
            tasks[0].requires().iter().map(|t| t.task_id()).collect();
        assert_eq!(query_requires, ["LoadTask(p:d.raw)"]);

        let extract_requires: Vec<String> =
            tasks[2].requires().iter().map(|t| t.task_id()).collect();
        assert_eq!(extract_requires, ["RunQueryTask(p:d.summary)"]);
        Ok(())
    }

    #[test]
    fn unknown_requirement_is_an_error() {
        let (warehouse, storage) = setup();
        let defs = parse(
            r#"[{"type": "view", "table": "p:d.v", "requires": ["nope"], "view": "SELECT 1"}]"#,
        );
        let err = build_tasks(&defs, &warehouse, &storage).err();
        assert!(err.is_some_and(|e| e.to_string().contains("unknown task 'nope'")));
    }

    #[test]
    fn duplicate_name_is_an_error() {
        let (warehouse, storage) = setup();
        let defs = parse(
            r#"[{"type": "external", "table": "p:d.t"}, {"type": "external", "table": "p:d.t"}]"#,
        );
        let err = build_tasks(&defs, &warehouse, &storage).err();
        assert!(err.is_some_and(|e| e.to_string().contains("duplicate task name 'p:d.t'")));
    }

    #[test]
    fn cycle_is_an_error() {
        let (warehouse, storage) = setup();
        let defs = parse(
            r#"[
                {"type": "view", "name": "a", "table": "p:d.a", "requires": ["b"],
                 "view": "SELECT 1"},
                {"type": "view", "name": "b", "table": "p:d.b", "requires": ["a"],
                 "view": "SELECT 1"}
            ]"#,
        );
        let err = build_tasks(&defs, &warehouse, &storage).err();
        assert!(err.is_some_and(|e| format!("{e:#}").contains("cyclic dependency")));
    }

    #[test]
    fn bad_table_reference_names_the_task() {
        let (warehouse, storage) = setup();
        let defs = parse(r#"[{"type": "external", "name": "x", "table": "not-a-table"}]"#);
        let err = build_tasks(&defs, &warehouse, &storage).err();
        assert!(err.is_some_and(|e| e.to_string().contains("building task 'x'")));
    }
}
