//! Critical path calculation using forward and backward passes.
//!
//! Only active tasks (not Completed/Cancelled) and Finish-to-Start links between
//! them take part. Durations are `due - start` in days and an FS link with lag
//! `L` means the successor starts `1 + L` days after the predecessor's due date.
//! Offsets are whole days relative to the earliest active start date.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use thiserror::Error;

use crate::graph::DependencyGraph;
use crate::models::{DependencyType, Task};

/// Error types for critical path calculation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriticalPathError {
    #[error("Circular dependency detected in task graph")]
    CircularDependency,
    #[error("Tasks without resolved dates: {}", .0.join(", "))]
    UnresolvedDates(Vec<String>),
}

/// Per-task timing information, in days from the project origin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskTiming {
    /// Earliest possible start (forward pass).
    pub earliest_start: i64,
    /// Earliest possible finish (forward pass).
    pub earliest_finish: i64,
    /// Latest allowable start (backward pass).
    pub latest_start: i64,
    /// Latest allowable finish (backward pass).
    pub latest_finish: i64,
    /// latest_start - earliest_start.
    pub slack: i64,
}

impl TaskTiming {
    /// Zero slack, or negative when a project end date cannot be met.
    pub fn is_critical(&self) -> bool {
        self.slack <= 0
    }
}

/// Result of a critical path calculation for a project.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CriticalPathResult {
    /// Timing for every active task.
    pub task_timings: FxHashMap<String, TaskTiming>,
    /// Critical task ids in topological order.
    pub critical_path_tasks: Vec<String>,
    /// Date that offset 0 refers to.
    pub origin: Option<NaiveDate>,
    /// Earliest finish of the whole project, in days from `origin`.
    pub project_length: i64,
}

impl CriticalPathResult {
    pub fn is_critical(&self, task_id: &str) -> bool {
        self.task_timings
            .get(task_id)
            .is_some_and(TaskTiming::is_critical)
    }
}

/// Calculate the critical path over all active tasks.
///
/// `project_end` pins the latest finish of terminal tasks; without it the
/// project's own earliest finish is used and no task has negative slack.
pub fn calculate_critical_path(
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
    project_end: Option<NaiveDate>,
) -> Result<CriticalPathResult, CriticalPathError> {
    let active: Vec<&Task> = graph
        .task_ids()
        .filter_map(|id| tasks.get(id))
        .filter(|t| !t.status.is_terminal())
        .collect();
    if active.is_empty() {
        return Ok(CriticalPathResult::default());
    }

    let unresolved: Vec<String> = active
        .iter()
        .filter(|t| t.start_date.is_none() || t.due_date.is_none())
        .map(|t| t.id.clone())
        .collect();
    if !unresolved.is_empty() {
        return Err(CriticalPathError::UnresolvedDates(unresolved));
    }

    let mut starts: FxHashMap<&str, NaiveDate> = FxHashMap::default();
    let mut durations: FxHashMap<&str, i64> = FxHashMap::default();
    for task in &active {
        if let (Some(start), Some(due)) = (task.start_date, task.due_date) {
            starts.insert(task.id.as_str(), start);
            // Inverted hammock spans count as zero-length.
            durations.insert(task.id.as_str(), (due - start).num_days().max(0));
        }
    }
    let Some(origin) = starts.values().min().copied() else {
        return Ok(CriticalPathResult::default());
    };
    let active_ids: FxHashSet<&str> = starts.keys().copied().collect();

    // predecessors[task] / successors[task] = [(other, lag)]
    let mut predecessors: FxHashMap<&str, Vec<(&str, i64)>> = FxHashMap::default();
    let mut successors: FxHashMap<&str, Vec<(&str, i64)>> = FxHashMap::default();
    for dep in graph.dependencies() {
        if dep.dependency_type != DependencyType::FinishToStart {
            continue;
        }
        let (pred, succ) = (dep.depends_on_task_id.as_str(), dep.task_id.as_str());
        if active_ids.contains(pred) && active_ids.contains(succ) {
            predecessors.entry(succ).or_default().push((pred, dep.lag_days));
            successors.entry(pred).or_default().push((succ, dep.lag_days));
        }
    }

    let order: Vec<&str> = active.iter().map(|t| t.id.as_str()).collect();
    let topo_order = topological_sort(&order, &predecessors, &successors)?;

    // Forward pass: ES = max(pred EF + 1 + lag), or the task's own start when unconstrained
    let mut timings: FxHashMap<&str, TaskTiming> =
        FxHashMap::with_capacity_and_hasher(topo_order.len(), Default::default());
    for &task_id in &topo_order {
        let own_start = (starts[task_id] - origin).num_days();
        let earliest_start = predecessors
            .get(task_id)
            .and_then(|preds| {
                preds
                    .iter()
                    .filter_map(|(p, lag)| {
                        timings
                            .get(p)
                            .map(|t| t.earliest_finish.saturating_add(1).saturating_add(*lag))
                    })
                    .max()
            })
            .unwrap_or(own_start);
        timings.insert(
            task_id,
            TaskTiming {
                earliest_start,
                earliest_finish: earliest_start.saturating_add(durations[task_id]),
                ..TaskTiming::default()
            },
        );
    }

    let project_length = timings
        .values()
        .map(|t| t.earliest_finish)
        .max()
        .unwrap_or(0);
    let terminal_finish = project_end
        .map(|end| (end - origin).num_days())
        .unwrap_or(project_length);

    // Backward pass: LF = min(succ LS - 1 - lag), or the terminal finish for sinks
    for &task_id in topo_order.iter().rev() {
        let latest_finish = successors
            .get(task_id)
            .and_then(|succs| {
                succs
                    .iter()
                    .filter_map(|(s, lag)| {
                        timings
                            .get(s)
                            .map(|t| t.latest_start.saturating_sub(1).saturating_sub(*lag))
                    })
                    .min()
            })
            .unwrap_or(terminal_finish);
        let latest_start = latest_finish.saturating_sub(durations[task_id]);
        if let Some(timing) = timings.get_mut(task_id) {
            timing.latest_finish = latest_finish;
            timing.latest_start = latest_start;
            timing.slack = latest_start - timing.earliest_start;
        }
    }

    let critical_path_tasks: Vec<String> = topo_order
        .iter()
        .filter(|id| timings.get(*id).is_some_and(TaskTiming::is_critical))
        .map(|id| id.to_string())
        .collect();

    let task_timings: FxHashMap<String, TaskTiming> = timings
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    Ok(CriticalPathResult {
        task_timings,
        critical_path_tasks,
        origin: Some(origin),
        project_length,
    })
}

/// Kahn's algorithm over the active subgraph, seeded in registration order.
fn topological_sort<'a>(
    order: &[&'a str],
    predecessors: &FxHashMap<&'a str, Vec<(&'a str, i64)>>,
    successors: &FxHashMap<&'a str, Vec<(&'a str, i64)>>,
) -> Result<Vec<&'a str>, CriticalPathError> {
    let mut in_degree: FxHashMap<&str, usize> = order
        .iter()
        .map(|&id| (id, predecessors.get(id).map_or(0, Vec::len)))
        .collect();

    let mut queue: VecDeque<&str> = order
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut result = Vec::with_capacity(order.len());
    while let Some(task_id) = queue.pop_front() {
        result.push(task_id);
        if let Some(succs) = successors.get(task_id) {
            for &(succ, _) in succs {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }
    }

    if result.len() != order.len() {
        return Err(CriticalPathError::CircularDependency);
    }
    Ok(result)
}
