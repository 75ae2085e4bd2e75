use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::tasks::Task;

/// Tasks reachable from `roots`, keyed by task id, plus each task's direct
/// dependency ids. Tasks sharing an id collapse to the first instance seen.
pub fn collect_graph(
    roots: &[Arc<dyn Task>],
) -> (
    BTreeMap<String, Arc<dyn Task>>,
    BTreeMap<String, BTreeSet<String>>,
) {
    let mut tasks: BTreeMap<String, Arc<dyn Task>> = BTreeMap::new();
    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut stack: Vec<Arc<dyn Task>> = roots.iter().rev().cloned().collect();

    while let Some(task) = stack.pop() {
        let id = task.task_id();
        if tasks.contains_key(&id) {
            continue;
        }
        let requires = task.requires();
        deps.insert(id.clone(), requires.iter().map(|t| t.task_id()).collect());
        tasks.insert(id, task);
        stack.extend(requires.into_iter().rev());
    }

    (tasks, deps)
}

/// A dependency cycle: these tasks (the cycle and everything downstream of
/// it) could never be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub stuck: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cyclic dependency detected: {} task(s) never became ready: {}",
            self.stuck.len(),
            self.stuck.join(", ")
        )
    }
}

impl std::error::Error for CycleError {}

/// Group tasks into levels: every task's dependencies sit in earlier levels.
///
/// Ids named only as a dependency become roots. Each round peels off every
/// task with nothing left to wait for, so levels come out sorted.
pub fn topological_levels(
    deps: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>, CycleError> {
    let mut waiting: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (task, task_deps) in deps {
        waiting
            .entry(task.as_str())
            .or_default()
            .extend(task_deps.iter().map(String::as_str));
        for dep in task_deps {
            waiting.entry(dep.as_str()).or_default();
        }
    }

    let mut levels = Vec::new();
    while !waiting.is_empty() {
        let ready: Vec<&str> = waiting
            .iter()
            .filter_map(|(&task, on)| on.is_empty().then_some(task))
            .collect();
        if ready.is_empty() {
            return Err(CycleError {
                stuck: waiting.keys().map(ToString::to_string).collect(),
            });
        }
        for task in &ready {
            waiting.remove(task);
        }
        for on in waiting.values_mut() {
            on.retain(|dep| !ready.contains(dep));
        }
        levels.push(ready.into_iter().map(ToString::to_string).collect());
    }
    Ok(levels)
}
