//! Cascade planning: which tasks move, and by how much, after a date edit or a
//! completion.
//!
//! Planning is pure. It reads tasks and the graph and returns
//! [`CascadeChange`] values; [`crate::Schedule`] decides whether to hold them
//! as a preview or apply them, according to the project's dependency mode.
//!
//! Propagation walks the whole graph once in topological order, so every task
//! sees all of its incoming proposals before it is finalized. A task reachable
//! over several paths is shifted once, by the proposal with the largest
//! absolute shift (ties keep the first proposal in processing order).

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::graph::{DependencyGraph, GraphError};
use crate::models::{
    add_days, CascadeChange, DateField, DateOutOfRange, DependencyType, SchedulingType, Task,
};
use crate::{log_checks, log_debug};

/// Errors from cascade planning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CascadeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    DateOutOfRange(#[from] DateOutOfRange),
}

/// What started a cascade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CascadeTrigger {
    /// A user moved one date of a task.
    DateEdit {
        task_id: String,
        field: DateField,
        old_value: Option<NaiveDate>,
        new_value: NaiveDate,
    },
    /// A task was marked Completed.
    Completion { task_id: String },
}

impl CascadeTrigger {
    pub fn task_id(&self) -> &str {
        match self {
            CascadeTrigger::DateEdit { task_id, .. } => task_id,
            CascadeTrigger::Completion { task_id } => task_id,
        }
    }
}

/// A computed cascade, stamped with the schedule revision it was computed at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadePlan {
    pub trigger: CascadeTrigger,
    /// The edit to the triggering task itself, when it has not been applied yet.
    pub origin: Option<CascadeChange>,
    /// Downstream moves, in processing order.
    pub changes: Vec<CascadeChange>,
    pub revision: u64,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        self.origin.is_none() && self.changes.is_empty()
    }

    /// Ids of the tasks this plan moves, origin first.
    pub fn affected_task_ids(&self) -> Vec<&str> {
        self.origin
            .iter()
            .chain(&self.changes)
            .map(|c| c.task_id.as_str())
            .collect()
    }
}

/// A task that starts a propagation with a known shift.
#[derive(Clone, Debug)]
struct Seed {
    task_id: String,
    shift: i64,
    /// Whether the seed itself gets a change record.
    emit: bool,
    dependency_type: Option<DependencyType>,
    lag_days: i64,
}

#[derive(Clone, Copy, Debug)]
struct Proposal {
    shift: i64,
    depth: usize,
    dependency_type: Option<DependencyType>,
    lag_days: i64,
    emit: bool,
}

/// The change a date edit makes to the edited task itself.
///
/// Only the edited field moves; a Buffer's due date follows its start.
pub fn origin_change(
    task: &Task,
    field: DateField,
    new_value: NaiveDate,
) -> Result<CascadeChange, DateOutOfRange> {
    let old_value = task.date(field);
    let days_shift = old_value.map_or(0, |old| (new_value - old).num_days());
    let mut change = CascadeChange {
        task_id: task.id.clone(),
        field,
        days_shift,
        old_start: task.start_date,
        old_due: task.due_date,
        new_start: task.start_date,
        new_due: task.due_date,
        dependency_type: None,
        lag_days: 0,
    };
    match field {
        DateField::Start => {
            change.new_start = Some(new_value);
            if task.scheduling_type == SchedulingType::Buffer {
                change.new_due = Some(add_days(new_value, task.buffer_size_days)?);
            }
        }
        DateField::Due => change.new_due = Some(new_value),
    }
    Ok(change)
}

/// Downstream moves caused by changing `field` of `task_id` to `new_value`.
///
/// The shift of the edited field carries unchanged along every successor link
/// (the existing gap, lag included, is preserved). Fails when a moved date
/// would leave the representable range.
pub fn plan_date_edit(
    task_id: &str,
    field: DateField,
    new_value: NaiveDate,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
    config: &EngineConfig,
) -> Result<Vec<CascadeChange>, CascadeError> {
    let task = tasks
        .get(task_id)
        .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;
    let Some(old_value) = task.date(field) else {
        log_checks!(config.verbosity, "{} has no {}, nothing to cascade", task_id, field);
        return Ok(Vec::new());
    };
    let shift = (new_value - old_value).num_days();
    if shift == 0 {
        return Ok(Vec::new());
    }

    propagate(
        vec![Seed {
            task_id: task_id.to_string(),
            shift,
            emit: false,
            dependency_type: None,
            lag_days: 0,
        }],
        None,
        tasks,
        graph,
        config,
    )
}

/// Moves caused by `task_id` becoming Completed on `today`.
///
/// Each FS successor whose FS predecessors are now all Completed is pulled (or
/// pushed) to `max(today, completed.due + 1) + lag`, keeping its duration; its
/// own FS successors then follow by the same shift. `tasks` must already show
/// the completed status.
pub fn plan_completion(
    task_id: &str,
    today: NaiveDate,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
    config: &EngineConfig,
) -> Result<Vec<CascadeChange>, CascadeError> {
    let completed = tasks
        .get(task_id)
        .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;
    let anchor = match completed.due_date {
        Some(due) => today.max(add_days(due, 1)?),
        None => today,
    };

    let mut seeds = Vec::new();
    for dep in graph.successors_of(task_id, Some(DependencyType::FinishToStart)) {
        let Some(succ) = tasks.get(&dep.task_id) else {
            continue;
        };
        if succ.status.is_terminal() || succ.scheduling_type != SchedulingType::Fixed {
            log_checks!(config.verbosity, "{}: not movable on completion of {}", succ.id, task_id);
            continue;
        }
        let all_done = graph
            .predecessors_of(&succ.id, Some(DependencyType::FinishToStart))
            .iter()
            .all(|p| tasks.get(&p.depends_on_task_id).is_some_and(|t| t.status.is_completed()));
        if !all_done {
            log_checks!(config.verbosity, "{}: waiting on other FS predecessors", succ.id);
            continue;
        }
        let Some(start) = succ.start_date else {
            continue;
        };
        let new_start = add_days(anchor, dep.lag_days)?;
        let shift = (new_start - start).num_days();
        if shift == 0 {
            continue;
        }
        seeds.push(Seed {
            task_id: succ.id.clone(),
            shift,
            emit: true,
            dependency_type: Some(dep.dependency_type),
            lag_days: dep.lag_days,
        });
    }

    if seeds.is_empty() {
        return Ok(Vec::new());
    }
    propagate(seeds, Some(DependencyType::FinishToStart), tasks, graph, config)
}

/// Spread seed shifts downstream in one topological pass, along links of
/// type `follow` (all links when `None`).
fn propagate(
    seeds: Vec<Seed>,
    follow: Option<DependencyType>,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
    config: &EngineConfig,
) -> Result<Vec<CascadeChange>, CascadeError> {
    let order = graph.topological_order(|_| true)?;
    log_debug!(config.verbosity, "cascade order: {:?}", order);

    let fixed_sources: FxHashSet<&str> = seeds
        .iter()
        .filter(|s| !s.emit)
        .map(|s| s.task_id.as_str())
        .collect();

    let mut proposals: FxHashMap<&str, Proposal> = FxHashMap::default();
    for seed in &seeds {
        offer(
            &mut proposals,
            seed.task_id.as_str(),
            Proposal {
                shift: seed.shift,
                depth: 0,
                dependency_type: seed.dependency_type,
                lag_days: seed.lag_days,
                emit: seed.emit,
            },
        );
    }

    let mut changes = Vec::new();
    for task_id in order {
        let Some(proposal) = proposals.get(task_id).copied() else {
            continue;
        };
        if proposal.shift == 0 {
            continue;
        }

        let is_source = fixed_sources.contains(task_id);
        if !is_source {
            let Some(task) = tasks.get(task_id) else {
                continue;
            };
            if !movable(task, config) {
                continue;
            }
            if proposal.depth > config.max_cascade_depth {
                tracing::warn!(
                    "cascade depth {} exceeded at {}, leaving it in place",
                    config.max_cascade_depth,
                    task_id
                );
                continue;
            }
            if proposal.emit {
                let field = proposal
                    .dependency_type
                    .map_or(DateField::Start, DependencyType::driven_field);
                changes.push(CascadeChange::shift(
                    task,
                    field,
                    proposal.shift,
                    proposal.dependency_type,
                    proposal.lag_days,
                )?);
            }
        }

        for dep in graph.successors_of(task_id, follow) {
            log_debug!(
                config.verbosity,
                "{} -> {} ({}, lag {}): shift {}",
                task_id,
                dep.task_id,
                dep.dependency_type,
                dep.lag_days,
                proposal.shift
            );
            offer(
                &mut proposals,
                dep.task_id.as_str(),
                Proposal {
                    shift: proposal.shift,
                    depth: proposal.depth + 1,
                    dependency_type: Some(dep.dependency_type),
                    lag_days: dep.lag_days,
                    emit: true,
                },
            );
        }
    }
    Ok(changes)
}

/// Record a proposal, keeping the one with the larger absolute shift.
fn offer<'a>(proposals: &mut FxHashMap<&'a str, Proposal>, task_id: &'a str, proposal: Proposal) {
    match proposals.get_mut(task_id) {
        Some(existing) => {
            if proposal.shift.abs() > existing.shift.abs() {
                *existing = Proposal {
                    depth: existing.depth.min(proposal.depth),
                    ..proposal
                };
            } else {
                existing.depth = existing.depth.min(proposal.depth);
            }
        }
        None => {
            proposals.insert(task_id, proposal);
        }
    }
}

/// Only Fixed tasks that are still open move in a cascade. Hammocks are
/// re-derived afterwards and Buffers absorb the shift; neither passes it on.
fn movable(task: &Task, config: &EngineConfig) -> bool {
    if task.status.is_terminal() {
        log_checks!(config.verbosity, "{}: {} tasks do not move", task.id, task.status);
        return false;
    }
    match task.scheduling_type {
        SchedulingType::Fixed => true,
        SchedulingType::Hammock | SchedulingType::Buffer => {
            log_checks!(
                config.verbosity,
                "{}: {} task stops the cascade",
                task.id,
                task.scheduling_type
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn setup(tasks: Vec<Task>) -> (FxHashMap<String, Task>, DependencyGraph) {
        let mut graph = DependencyGraph::new();
        let mut map = FxHashMap::default();
        for task in tasks {
            graph.add_task(&task.id);
            map.insert(task.id.clone(), task);
        }
        (map, graph)
    }

    fn fs(graph: &mut DependencyGraph, succ: &str, pred: &str, lag: i64) {
        graph
            .add_dependency(succ, pred, DependencyType::FinishToStart, lag)
            .unwrap();
    }

    #[test]
    fn test_date_edit_shifts_successor() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_dates(date(1, 1), date(1, 10)),
            Task::new("b", "p").with_dates(date(1, 12), date(1, 16)),
        ]);
        fs(&mut graph, "b", "a", 1);

        let changes = plan_date_edit(
            "a",
            DateField::Due,
            date(1, 15),
            &tasks,
            &graph,
            &EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.task_id, "b");
        assert_eq!(change.days_shift, 5);
        assert_eq!(change.field, DateField::Start);
        assert_eq!(change.new_start, Some(date(1, 17)));
        assert_eq!(change.new_due, Some(date(1, 21)));
        assert_eq!(change.lag_days, 1);
    }

    #[test]
    fn test_diamond_shifts_once() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_dates(date(1, 1), date(1, 2)),
            Task::new("b", "p").with_dates(date(1, 3), date(1, 4)),
            Task::new("c", "p").with_dates(date(1, 3), date(1, 5)),
            Task::new("d", "p").with_dates(date(1, 6), date(1, 8)),
        ]);
        fs(&mut graph, "b", "a", 0);
        fs(&mut graph, "c", "a", 0);
        fs(&mut graph, "d", "b", 0);
        fs(&mut graph, "d", "c", 0);

        let changes = plan_date_edit(
            "a",
            DateField::Due,
            date(1, 4),
            &tasks,
            &graph,
            &EngineConfig::default(),
        )
        .unwrap();
        let ids: Vec<&str> = changes.iter().map(|c| c.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
        assert!(changes.iter().all(|c| c.days_shift == 2));
    }

    #[test]
    fn test_hammock_and_buffer_stop_cascade() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_dates(date(1, 1), date(1, 2)),
            Task::new("h", "p").with_scheduling_type(SchedulingType::Hammock),
            Task::new("buf", "p").with_buffer(date(1, 3), 3),
            Task::new("z", "p").with_dates(date(1, 10), date(1, 12)),
        ]);
        fs(&mut graph, "h", "a", 0);
        fs(&mut graph, "buf", "a", 0);
        fs(&mut graph, "z", "buf", 0);

        let changes = plan_date_edit(
            "a",
            DateField::Due,
            date(1, 5),
            &tasks,
            &graph,
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_completed_successor_not_moved() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_dates(date(1, 1), date(1, 2)),
            Task::new("b", "p")
                .with_dates(date(1, 3), date(1, 4))
                .with_status(TaskStatus::Completed),
        ]);
        fs(&mut graph, "b", "a", 0);
        let changes = plan_date_edit(
            "a",
            DateField::Start,
            date(1, 2),
            &tasks,
            &graph,
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_dates(date(1, 1), date(1, 2)),
            Task::new("b", "p").with_dates(date(1, 3), date(1, 4)),
            Task::new("c", "p").with_dates(date(1, 5), date(1, 6)),
        ]);
        fs(&mut graph, "b", "a", 0);
        fs(&mut graph, "c", "b", 0);
        let config = EngineConfig::default().with_max_cascade_depth(1);
        let changes =
            plan_date_edit("a", DateField::Due, date(1, 3), &tasks, &graph, &config).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].task_id, "b");
    }

    #[test]
    fn test_completion_pulls_successor_forward() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p")
                .with_dates(date(1, 1), date(1, 10))
                .with_status(TaskStatus::Completed),
            Task::new("b", "p").with_dates(date(1, 12), date(1, 16)),
            Task::new("c", "p").with_dates(date(1, 17), date(1, 18)),
        ]);
        fs(&mut graph, "b", "a", 0);
        fs(&mut graph, "c", "b", 0);

        let changes =
            plan_completion("a", date(1, 7), &tasks, &graph, &EngineConfig::default()).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].task_id, "b");
        assert_eq!(changes[0].new_start, Some(date(1, 11)));
        assert_eq!(changes[0].new_due, Some(date(1, 15)));
        assert_eq!(changes[1].task_id, "c");
        assert_eq!(changes[1].days_shift, -1);
    }

    #[test]
    fn test_completion_anchor_uses_today_when_late() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p")
                .with_dates(date(1, 1), date(1, 10))
                .with_status(TaskStatus::Completed),
            Task::new("b", "p").with_dates(date(1, 12), date(1, 16)),
        ]);
        fs(&mut graph, "b", "a", 2);

        let changes =
            plan_completion("a", date(1, 20), &tasks, &graph, &EngineConfig::default()).unwrap();
        assert_eq!(changes[0].new_start, Some(date(1, 22)));
        assert_eq!(changes[0].new_due, Some(date(1, 26)));
    }

    #[test]
    fn test_completion_waits_for_all_fs_predecessors() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p")
                .with_dates(date(1, 1), date(1, 5))
                .with_status(TaskStatus::Completed),
            Task::new("other", "p").with_dates(date(1, 1), date(1, 9)),
            Task::new("b", "p").with_dates(date(1, 12), date(1, 16)),
        ]);
        fs(&mut graph, "b", "a", 0);
        fs(&mut graph, "b", "other", 0);

        let changes =
            plan_completion("a", date(1, 3), &tasks, &graph, &EngineConfig::default()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_completion_seeds_merge_by_largest_shift() {
        // b and c both follow a; d follows both.
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p")
                .with_dates(date(1, 1), date(1, 10))
                .with_status(TaskStatus::Completed),
            Task::new("b", "p").with_dates(date(1, 14), date(1, 15)),
            Task::new("c", "p").with_dates(date(1, 12), date(1, 13)),
            Task::new("d", "p").with_dates(date(1, 20), date(1, 21)),
        ]);
        fs(&mut graph, "b", "a", 0);
        fs(&mut graph, "c", "a", 0);
        fs(&mut graph, "d", "b", 0);
        fs(&mut graph, "d", "c", 0);

        let changes =
            plan_completion("a", date(1, 1), &tasks, &graph, &EngineConfig::default()).unwrap();
        // b: 14 -> 11 (-3), c: 12 -> 11 (-1); d takes -3.
        let d = changes.iter().find(|c| c.task_id == "d").unwrap();
        assert_eq!(d.days_shift, -3);
        assert_eq!(changes.iter().filter(|c| c.task_id == "d").count(), 1);
    }

    #[test]
    fn test_completion_follows_finish_to_start_only() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p")
                .with_dates(date(1, 1), date(1, 10))
                .with_status(TaskStatus::Completed),
            Task::new("b", "p").with_dates(date(1, 12), date(1, 16)),
            Task::new("c", "p").with_dates(date(1, 14), date(1, 15)),
        ]);
        fs(&mut graph, "b", "a", 0);
        graph
            .add_dependency("c", "b", DependencyType::StartToStart, 0)
            .unwrap();

        let changes =
            plan_completion("a", date(1, 7), &tasks, &graph, &EngineConfig::default()).unwrap();
        let ids: Vec<&str> = changes.iter().map(|c| c.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(changes[0].new_start, Some(date(1, 11)));
    }

    #[test]
    fn test_date_edit_past_last_date_fails() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_dates(date(1, 1), date(1, 2)),
            Task::new("b", "p").with_dates(NaiveDate::MAX, NaiveDate::MAX),
        ]);
        fs(&mut graph, "b", "a", 0);

        let result = plan_date_edit(
            "a",
            DateField::Due,
            date(1, 7),
            &tasks,
            &graph,
            &EngineConfig::default(),
        );
        assert!(matches!(result, Err(CascadeError::DateOutOfRange(_))));
    }

    #[test]
    fn test_origin_change_for_buffer_moves_due() {
        let task = Task::new("buf", "p").with_buffer(date(1, 10), 4);
        let change = origin_change(&task, DateField::Start, date(1, 12)).unwrap();
        assert_eq!(change.days_shift, 2);
        assert_eq!(change.new_start, Some(date(1, 12)));
        assert_eq!(change.new_due, Some(date(1, 16)));
    }
}
