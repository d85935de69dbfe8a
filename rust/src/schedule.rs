//! Per-project scheduling session.
//!
//! A [`Schedule`] holds one project's tasks and dependency graph as supplied by
//! the host store, applies the host's mutations, and keeps the derived fields
//! (`is_blocked`, Hammock dates, Buffer due date and consumption) in step.
//! Every mutation bumps a revision counter; cascade previews carry the
//! revision they were computed at and are refused once it moves on.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::blocked::{dependents_for_reevaluation, evaluate_blocked, group_status, GroupStatus};
use crate::cascade::{
    origin_change, plan_completion, plan_date_edit, CascadeError, CascadePlan, CascadeTrigger,
};
use crate::config::EngineConfig;
use crate::critical_path::{calculate_critical_path, CriticalPathError, CriticalPathResult};
use crate::graph::{DependencyGraph, GraphError};
use crate::hammock::{buffer_due_date, compute_buffer_consumption, compute_hammock_dates, HammockDates};
use crate::models::{
    check_supported, BlockedState, CascadeChange, DateField, DateOutOfRange, Dependency,
    DependencyId, DependencyMode, DependencyType, Project, SchedulingType, Task, TaskStatus,
    UnblockedEvent, MAX_LAG_DAYS,
};
use crate::{log_changes, log_checks};

/// Errors that can occur while mutating a schedule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    CriticalPath(#[from] CriticalPathError),
    #[error(transparent)]
    DateOutOfRange(#[from] DateOutOfRange),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Task {task_id} belongs to project {found}, not {expected}")]
    WrongProject {
        task_id: String,
        expected: String,
        found: String,
    },
    #[error("Hammock task dates are auto-calculated and cannot be changed manually: {0}")]
    HammockDatesLocked(String),
    #[error("Buffer due date is derived from its start and size: {0}")]
    BufferDueDateDerived(String),
    #[error("Due date cannot be before start date: {0}")]
    InvalidDateRange(String),
    #[error("Buffer size of {size} days is outside -36500..=36500: {task_id}")]
    BufferSizeOutOfRange { task_id: String, size: i64 },
    #[error("Task cannot depend on the group it belongs to: {0}")]
    GroupSelfDependency(String),
    #[error("Cascade computed at revision {planned} is stale (schedule is at {current}); preview again")]
    StaleCascade { planned: u64, current: u64 },
    #[error("No pending cascade")]
    NoPendingCascade,
}

impl From<CascadeError> for ScheduleError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::Graph(e) => ScheduleError::Graph(e),
            CascadeError::DateOutOfRange(e) => ScheduleError::DateOutOfRange(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Side effects of a mutation that the host should act on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    /// Tasks that went from blocked to unblocked, for the notification collaborator.
    pub unblocked: Vec<UnblockedEvent>,
    /// Computed tasks whose dates or buffer consumption changed.
    pub recalculated: Vec<String>,
    /// Hammock tasks whose derived due date falls before their start.
    pub inverted_hammocks: Vec<String>,
}

impl Effects {
    fn merge(&mut self, other: Effects) {
        self.unblocked.extend(other.unblocked);
        for id in other.recalculated {
            if !self.recalculated.contains(&id) {
                self.recalculated.push(id);
            }
        }
        for id in other.inverted_hammocks {
            if !self.inverted_hammocks.contains(&id) {
                self.inverted_hammocks.push(id);
            }
        }
    }
}

/// Result of committing a cascade.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Tasks whose dates were written, in application order.
    pub updated_tasks: Vec<String>,
    pub effects: Effects,
}

impl ApplyReport {
    pub fn total_updated(&self) -> usize {
        self.updated_tasks.len()
    }
}

/// What happened to the downstream tasks after an edit or completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// Nothing downstream moves (mode Off, or no successor affected).
    Skipped,
    /// Changes were committed (Strict mode, or only the edit itself).
    Applied(ApplyReport),
    /// Changes are held for confirmation (Flexible mode).
    Pending(CascadePlan),
}

/// Result of a status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusOutcome {
    pub effects: Effects,
    pub cascade: CascadeOutcome,
}

/// Blocked state plus the transition event, if this evaluation cleared a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockedEvaluation {
    pub state: BlockedState,
    pub unblocked: Option<UnblockedEvent>,
}

/// Predecessor and successor links of one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDependencies {
    pub predecessors: Vec<Dependency>,
    pub successors: Vec<Dependency>,
    pub is_blocked: bool,
}

/// A Flexible-mode cascade waiting for confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCascade {
    pub plan: CascadePlan,
    /// The already-committed edit that triggered the plan, kept for revert.
    pub edit: Option<CascadeChange>,
}

/// A schedule shared between request handlers. The mutex serializes every
/// mutation of the project, dependency edits included.
pub type SharedSchedule = Arc<Mutex<Schedule>>;

/// One project's tasks, dependencies and derived scheduling state.
#[derive(Clone, Debug)]
pub struct Schedule {
    project: Project,
    config: EngineConfig,
    tasks: FxHashMap<String, Task>,
    graph: DependencyGraph,
    revision: u64,
    pending: Option<PendingCascade>,
}

impl Schedule {
    pub fn new(project: Project, config: EngineConfig) -> Self {
        Self {
            project,
            config,
            tasks: FxHashMap::default(),
            graph: DependencyGraph::new(),
            revision: 0,
            pending: None,
        }
    }

    /// Build a schedule from stored records without recomputing anything.
    ///
    /// Derived fields are taken as stored; run [`Schedule::sweep`] to refresh them.
    pub fn load(
        project: Project,
        config: EngineConfig,
        tasks: Vec<Task>,
        dependencies: Vec<Dependency>,
    ) -> Result<Self> {
        let mut schedule = Self::new(project, config);
        for task in tasks {
            schedule.validate_task(&task)?;
            schedule.graph.add_task(&task.id);
            schedule.tasks.insert(task.id.clone(), task);
        }
        for dependency in dependencies {
            schedule.graph.insert_dependency(dependency)?;
        }
        Ok(schedule)
    }

    pub fn into_shared(self) -> SharedSchedule {
        Arc::new(Mutex::new(self))
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Change the dependency mode. Only later cascades are affected.
    pub fn set_dependency_mode(&mut self, mode: DependencyMode) {
        log_changes!(self.config.verbosity, "project {}: mode {} -> {}", self.project.id, self.project.dependency_mode, mode);
        self.project.dependency_mode = mode;
    }

    pub fn set_project_end(&mut self, end_date: Option<NaiveDate>) {
        self.project.end_date = end_date;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.task_ids().filter_map(|id| self.tasks.get(id))
    }

    pub fn pending_cascade(&self) -> Option<&PendingCascade> {
        self.pending.as_ref()
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert or replace a task, then refresh whatever depends on it.
    pub fn upsert_task(&mut self, mut task: Task) -> Result<Effects> {
        self.validate_task(&task)?;
        if task.scheduling_type == SchedulingType::Buffer {
            task.due_date = buffer_due_date(&task);
        }
        let task_id = task.id.clone();
        let status_changed = self
            .tasks
            .get(&task_id)
            .map_or(true, |old| old.status != task.status || old.task_group != task.task_group);
        // members of the old group lose this task when it moves out
        let mut to_check = vec![task_id.clone()];
        if status_changed {
            to_check.extend(dependents_for_reevaluation(&task_id, &self.tasks, &self.graph));
        }

        self.graph.add_task(&task_id);
        self.tasks.insert(task_id.clone(), task);
        self.bump();

        let mut effects = Effects::default();
        if status_changed {
            for id in dependents_for_reevaluation(&task_id, &self.tasks, &self.graph) {
                if !to_check.contains(&id) {
                    to_check.push(id);
                }
            }
        }
        effects.merge(self.refresh_blocked(&to_check));
        effects.merge(self.refresh_computed(&[task_id]));
        Ok(effects)
    }

    /// Remove a task and its links. Tasks it was blocking are re-evaluated.
    pub fn remove_task(&mut self, task_id: &str) -> Result<(Task, Effects)> {
        if !self.tasks.contains_key(task_id) {
            return Err(ScheduleError::TaskNotFound(task_id.to_string()));
        }
        let mut affected = dependents_for_reevaluation(task_id, &self.tasks, &self.graph);
        let neighbours = self.neighbour_ids(task_id);

        self.graph.remove_task(task_id)?;
        let task = self
            .tasks
            .remove(task_id)
            .ok_or_else(|| ScheduleError::TaskNotFound(task_id.to_string()))?;
        self.bump();

        affected.retain(|id| self.tasks.contains_key(id));
        let mut effects = self.refresh_blocked(&affected);
        effects.merge(self.refresh_computed(&neighbours));
        Ok((task, effects))
    }

    /// Change a task's status, re-evaluate the tasks it gates and run the
    /// completion cascade when it becomes Completed.
    pub fn set_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        today: NaiveDate,
    ) -> Result<StatusOutcome> {
        check_supported(today)?;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ScheduleError::TaskNotFound(task_id.to_string()))?;
        let previous = task.status;
        if previous == status {
            return Ok(StatusOutcome {
                effects: Effects::default(),
                cascade: CascadeOutcome::Skipped,
            });
        }

        task.status = status;
        match status {
            TaskStatus::Completed => {
                task.progress = 100;
                task.completed_date.get_or_insert(today);
            }
            TaskStatus::Cancelled => {
                task.progress = 0;
                task.completed_date = None;
            }
            _ => task.completed_date = None,
        }
        log_changes!(self.config.verbosity, "{}: {} -> {}", task_id, previous, status);
        self.bump();

        let dependents = dependents_for_reevaluation(task_id, &self.tasks, &self.graph);
        let effects = self.refresh_blocked(&dependents);

        let cascade = if status.is_completed() {
            self.on_task_completed(task_id, today)?
        } else {
            CascadeOutcome::Skipped
        };
        Ok(StatusOutcome { effects, cascade })
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    /// Add `task_id depends on depends_on`. Rejected, with the graph left
    /// unchanged, on self-reference, duplicates, cycles or an out-of-range lag.
    pub fn add_dependency(
        &mut self,
        task_id: &str,
        depends_on: &str,
        dependency_type: DependencyType,
        lag_days: i64,
    ) -> Result<(DependencyId, Effects)> {
        let id = self
            .graph
            .add_dependency(task_id, depends_on, dependency_type, lag_days)?;
        log_changes!(
            self.config.verbosity,
            "{} now depends on {} ({}, lag {})",
            task_id,
            depends_on,
            dependency_type,
            lag_days
        );
        self.bump();
        let mut effects = self.refresh_blocked(&[task_id.to_string()]);
        effects.merge(self.refresh_computed(&[task_id.to_string(), depends_on.to_string()]));
        Ok((id, effects))
    }

    pub fn remove_dependency(&mut self, id: DependencyId) -> Result<Effects> {
        let removed = self.graph.remove_dependency(id)?;
        self.bump();
        let mut effects = self.refresh_blocked(&[removed.task_id.clone()]);
        effects.merge(self.refresh_computed(&[removed.task_id, removed.depends_on_task_id]));
        Ok(effects)
    }

    pub fn update_dependency(
        &mut self,
        id: DependencyId,
        dependency_type: Option<DependencyType>,
        lag_days: Option<i64>,
    ) -> Result<Effects> {
        let previous = self.graph.update_dependency(id, dependency_type, lag_days)?;
        self.bump();
        let mut effects = self.refresh_blocked(&[previous.task_id.clone()]);
        effects.merge(self.refresh_computed(&[previous.task_id, previous.depends_on_task_id]));
        Ok(effects)
    }

    /// The cycle that adding `task_id depends on depends_on` would create, if any.
    pub fn check_circular_dependency(&self, task_id: &str, depends_on: &str) -> Option<Vec<String>> {
        self.graph.find_cycle(task_id, depends_on)
    }

    pub fn dependencies_of(&self, task_id: &str) -> Result<TaskDependencies> {
        let task = self.get(task_id)?;
        Ok(TaskDependencies {
            predecessors: self.graph.predecessors_of(task_id, None).into_iter().cloned().collect(),
            successors: self.graph.successors_of(task_id, None).into_iter().cloned().collect(),
            is_blocked: task.is_blocked,
        })
    }

    // ------------------------------------------------------------------
    // Blocked state
    // ------------------------------------------------------------------

    /// Current blocked state, without recording it.
    pub fn blocked_state(&self, task_id: &str) -> Result<BlockedState> {
        let task = self.get(task_id)?;
        Ok(evaluate_blocked(task, &self.tasks, &self.graph))
    }

    /// Evaluate and record the blocked state; emits an event when a block clears.
    pub fn evaluate_blocked(&mut self, task_id: &str) -> Result<BlockedEvaluation> {
        let state = self.blocked_state(task_id)?;
        let unblocked = self.record_blocked(&state);
        Ok(BlockedEvaluation { state, unblocked })
    }

    pub fn group_status(&self, group: &str) -> GroupStatus {
        group_status(group, &self.project.id, &self.tasks, &self.graph)
    }

    // ------------------------------------------------------------------
    // Computed dates
    // ------------------------------------------------------------------

    /// Re-derive a Hammock task's dates. `None` for other task types.
    pub fn recalculate_computed_dates(&mut self, task_id: &str) -> Result<Option<HammockDates>> {
        let task = self.get(task_id)?;
        if task.scheduling_type != SchedulingType::Hammock {
            return Ok(None);
        }
        let dates = compute_hammock_dates(task_id, &self.tasks, &self.graph);
        let mut effects = Effects::default();
        self.store_hammock_dates(task_id, dates, &mut effects);
        Ok(Some(dates))
    }

    /// Re-derive a Buffer task's due date and consumption. `None` for other task types.
    pub fn recalculate_buffer_consumption(&mut self, task_id: &str) -> Result<Option<f64>> {
        let task = self.get(task_id)?;
        if task.scheduling_type != SchedulingType::Buffer {
            return Ok(None);
        }
        let mut effects = Effects::default();
        Ok(Some(self.store_buffer(task_id, &mut effects)))
    }

    // ------------------------------------------------------------------
    // Cascades
    // ------------------------------------------------------------------

    /// Compute, without mutating anything, what moving `field` of `task_id`
    /// to `new_value` would do. In mode Off the plan holds only the edit.
    pub fn preview_cascade(
        &self,
        task_id: &str,
        field: DateField,
        new_value: NaiveDate,
    ) -> Result<CascadePlan> {
        let task = self.get(task_id)?;
        match (task.scheduling_type, field) {
            (SchedulingType::Hammock, _) => {
                return Err(ScheduleError::HammockDatesLocked(task_id.to_string()))
            }
            (SchedulingType::Buffer, DateField::Due) => {
                return Err(ScheduleError::BufferDueDateDerived(task_id.to_string()))
            }
            _ => {}
        }

        check_supported(new_value)?;
        let origin = origin_change(task, field, new_value)?;
        if let (Some(start), Some(due)) = (origin.new_start, origin.new_due) {
            if due < start {
                return Err(ScheduleError::InvalidDateRange(task_id.to_string()));
            }
        }

        let changes = match self.project.dependency_mode {
            DependencyMode::Off => Vec::new(),
            DependencyMode::Flexible | DependencyMode::Strict => {
                plan_date_edit(task_id, field, new_value, &self.tasks, &self.graph, &self.config)?
            }
        };

        Ok(CascadePlan {
            trigger: CascadeTrigger::DateEdit {
                task_id: task_id.to_string(),
                field,
                old_value: task.date(field),
                new_value,
            },
            origin: Some(origin),
            changes,
            revision: self.revision,
        })
    }

    /// Edit one date of a task and cascade according to the project mode:
    /// Off commits only the edit, Strict commits everything, Flexible commits
    /// the edit and holds the downstream moves as the pending cascade.
    pub fn edit_task_dates(
        &mut self,
        task_id: &str,
        field: DateField,
        new_value: NaiveDate,
    ) -> Result<CascadeOutcome> {
        let mut plan = self.preview_cascade(task_id, field, new_value)?;
        if self.pending.take().is_some() {
            log_checks!(self.config.verbosity, "dropping previous pending cascade");
        }

        let mode = self.project.dependency_mode;
        match mode {
            DependencyMode::Off | DependencyMode::Strict => {
                Ok(CascadeOutcome::Applied(self.commit(&plan)?))
            }
            DependencyMode::Flexible if plan.changes.is_empty() => {
                Ok(CascadeOutcome::Applied(self.commit(&plan)?))
            }
            DependencyMode::Flexible => {
                let changes = std::mem::take(&mut plan.changes);
                let edit = plan.origin.clone();
                self.commit(&plan)?;

                let pending = CascadePlan {
                    trigger: plan.trigger,
                    origin: None,
                    changes,
                    revision: self.revision,
                };
                log_changes!(
                    self.config.verbosity,
                    "{}: {} downstream changes awaiting confirmation",
                    task_id,
                    pending.changes.len()
                );
                self.pending = Some(PendingCascade {
                    plan: pending.clone(),
                    edit,
                });
                Ok(CascadeOutcome::Pending(pending))
            }
        }
    }

    /// Commit a previously computed plan. All changes are validated first,
    /// so either every change is written or none is.
    pub fn apply_cascade(&mut self, plan: &CascadePlan) -> Result<ApplyReport> {
        if self.pending.as_ref().is_some_and(|p| &p.plan == plan) {
            self.pending = None;
        }
        self.commit(plan)
    }

    /// Commit the pending Flexible-mode cascade.
    pub fn confirm_pending_cascade(&mut self) -> Result<ApplyReport> {
        let pending = self.pending.take().ok_or(ScheduleError::NoPendingCascade)?;
        self.commit(&pending.plan)
    }

    /// Drop the pending cascade. With `revert`, the edit that triggered it is
    /// rolled back too.
    ///
    /// A revert of a stale cascade is refused and the pending cascade kept.
    pub fn discard_pending_cascade(&mut self, revert: bool) -> Result<Effects> {
        let planned = self
            .pending
            .as_ref()
            .ok_or(ScheduleError::NoPendingCascade)?
            .plan
            .revision;
        let reverting = revert && self.pending.as_ref().is_some_and(|p| p.edit.is_some());
        if reverting {
            self.check_revision(planned)?;
        }
        let pending = self.pending.take().ok_or(ScheduleError::NoPendingCascade)?;
        let Some(edit) = pending.edit.filter(|_| revert) else {
            return Ok(Effects::default());
        };

        let rollback = CascadeChange {
            task_id: edit.task_id.clone(),
            field: edit.field,
            days_shift: -edit.days_shift,
            old_start: edit.new_start,
            old_due: edit.new_due,
            new_start: edit.old_start,
            new_due: edit.old_due,
            dependency_type: None,
            lag_days: 0,
        };
        let plan = CascadePlan {
            trigger: pending.plan.trigger,
            origin: Some(rollback),
            changes: Vec::new(),
            revision: self.revision,
        };
        Ok(self.commit(&plan)?.effects)
    }

    /// Cascade for a task that has just been marked Completed.
    ///
    /// Returns `Skipped` if the task is not Completed or the mode is Off.
    pub fn on_task_completed(&mut self, task_id: &str, today: NaiveDate) -> Result<CascadeOutcome> {
        let task = self.get(task_id)?;
        if !task.status.is_completed() || self.project.dependency_mode == DependencyMode::Off {
            return Ok(CascadeOutcome::Skipped);
        }

        let changes = plan_completion(task_id, today, &self.tasks, &self.graph, &self.config)?;
        if changes.is_empty() {
            return Ok(CascadeOutcome::Skipped);
        }
        let plan = CascadePlan {
            trigger: CascadeTrigger::Completion {
                task_id: task_id.to_string(),
            },
            origin: None,
            changes,
            revision: self.revision,
        };

        let mode = self.project.dependency_mode;
        match mode {
            DependencyMode::Strict => {
                let report = self.commit(&plan)?;
                log_changes!(
                    self.config.verbosity,
                    "{} completed: {} tasks rescheduled",
                    task_id,
                    report.total_updated()
                );
                Ok(CascadeOutcome::Applied(report))
            }
            _ => {
                self.pending = Some(PendingCascade {
                    plan: plan.clone(),
                    edit: None,
                });
                Ok(CascadeOutcome::Pending(plan))
            }
        }
    }

    // ------------------------------------------------------------------
    // Critical path
    // ------------------------------------------------------------------

    pub fn compute_critical_path(&self) -> Result<CriticalPathResult> {
        Ok(calculate_critical_path(
            &self.tasks,
            &self.graph,
            self.project.end_date,
        )?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn get(&self, task_id: &str) -> Result<&Task> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| ScheduleError::TaskNotFound(task_id.to_string()))
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    fn check_revision(&self, planned: u64) -> Result<()> {
        if planned != self.revision {
            log_checks!(self.config.verbosity, "stale cascade: planned at {}, now {}", planned, self.revision);
            return Err(ScheduleError::StaleCascade {
                planned,
                current: self.revision,
            });
        }
        Ok(())
    }

    fn validate_task(&self, task: &Task) -> Result<()> {
        if task.project_id != self.project.id {
            return Err(ScheduleError::WrongProject {
                task_id: task.id.clone(),
                expected: self.project.id.clone(),
                found: task.project_id.clone(),
            });
        }
        for date in [task.start_date, task.due_date, task.completed_date].into_iter().flatten() {
            check_supported(date)?;
        }
        if !(-MAX_LAG_DAYS..=MAX_LAG_DAYS).contains(&task.buffer_size_days) {
            return Err(ScheduleError::BufferSizeOutOfRange {
                task_id: task.id.clone(),
                size: task.buffer_size_days,
            });
        }
        if task.scheduling_type == SchedulingType::Fixed {
            if let (Some(start), Some(due)) = (task.start_date, task.due_date) {
                if due < start {
                    return Err(ScheduleError::InvalidDateRange(task.id.clone()));
                }
            }
        }
        if let (Some(dep_group), Some(group)) = (&task.depends_on_group, &task.task_group) {
            if dep_group == group {
                return Err(ScheduleError::GroupSelfDependency(task.id.clone()));
            }
        }
        Ok(())
    }

    /// Validate every change against current dates, then write them all.
    fn commit(&mut self, plan: &CascadePlan) -> Result<ApplyReport> {
        self.check_revision(plan.revision)?;
        let all: Vec<&CascadeChange> = plan.origin.iter().chain(&plan.changes).collect();
        for change in &all {
            let task = self.get(&change.task_id)?;
            if task.start_date != change.old_start || task.due_date != change.old_due {
                return Err(ScheduleError::StaleCascade {
                    planned: plan.revision,
                    current: self.revision,
                });
            }
        }

        let mut updated_tasks = Vec::with_capacity(all.len());
        for change in all {
            if let Some(task) = self.tasks.get_mut(&change.task_id) {
                task.start_date = change.new_start;
                task.due_date = change.new_due;
                log_changes!(
                    self.config.verbosity,
                    "{}: {:?}..{:?} -> {:?}..{:?} ({:+} days)",
                    change.task_id,
                    change.old_start,
                    change.old_due,
                    change.new_start,
                    change.new_due,
                    change.days_shift
                );
                updated_tasks.push(change.task_id.clone());
            }
        }
        if !updated_tasks.is_empty() {
            self.bump();
        }

        let effects = self.refresh_computed(&updated_tasks);
        Ok(ApplyReport {
            updated_tasks,
            effects,
        })
    }

    /// Write a change's new dates without validation.
    pub(crate) fn write_dates(&mut self, change: &CascadeChange) {
        if let Some(task) = self.tasks.get_mut(&change.task_id) {
            task.start_date = change.new_start;
            task.due_date = change.new_due;
            self.revision += 1;
        }
    }

    /// Store a new blocked flag; returns the event when a block cleared.
    fn record_blocked(&mut self, state: &BlockedState) -> Option<UnblockedEvent> {
        let task = self.tasks.get_mut(&state.task_id)?;
        let was_blocked = task.is_blocked;
        task.is_blocked = state.is_blocked;
        if was_blocked && !state.is_blocked {
            log_changes!(self.config.verbosity, "{} is no longer blocked", task.id);
            return Some(UnblockedEvent {
                task_id: task.id.clone(),
                assignee: task.assignee.clone(),
            });
        }
        None
    }

    pub(crate) fn refresh_blocked(&mut self, task_ids: &[String]) -> Effects {
        let mut effects = Effects::default();
        for task_id in task_ids {
            let Some(task) = self.tasks.get(task_id) else {
                continue;
            };
            let state = evaluate_blocked(task, &self.tasks, &self.graph);
            if let Some(event) = self.record_blocked(&state) {
                effects.unblocked.push(event);
            }
        }
        effects
    }

    /// Recompute Hammock and Buffer tasks near `task_ids`, following chains of
    /// computed tasks, in topological order.
    pub(crate) fn refresh_computed(&mut self, task_ids: &[String]) -> Effects {
        let mut targets: FxHashSet<String> = FxHashSet::default();
        let mut stack: Vec<String> = Vec::new();
        for task_id in task_ids {
            stack.push(task_id.clone());
            stack.extend(self.neighbour_ids(task_id));
        }
        while let Some(task_id) = stack.pop() {
            let Some(task) = self.tasks.get(&task_id) else {
                continue;
            };
            if task.scheduling_type == SchedulingType::Fixed || targets.contains(&task_id) {
                continue;
            }
            stack.extend(self.neighbour_ids(&task_id));
            targets.insert(task_id);
        }
        self.recompute_in_order(&targets)
    }

    pub(crate) fn recompute_in_order(&mut self, targets: &FxHashSet<String>) -> Effects {
        let mut effects = Effects::default();
        if targets.is_empty() {
            return effects;
        }
        let order: Vec<String> = match self.graph.topological_order(|_| true) {
            Ok(order) => order
                .into_iter()
                .filter(|id| targets.contains(*id))
                .map(str::to_string)
                .collect(),
            Err(_) => return effects,
        };

        for task_id in order {
            let Some(task) = self.tasks.get(&task_id) else {
                continue;
            };
            match task.scheduling_type {
                SchedulingType::Hammock => {
                    let dates = compute_hammock_dates(&task_id, &self.tasks, &self.graph);
                    self.store_hammock_dates(&task_id, dates, &mut effects);
                }
                SchedulingType::Buffer => {
                    self.store_buffer(&task_id, &mut effects);
                }
                SchedulingType::Fixed => {}
            }
        }
        effects
    }

    fn store_hammock_dates(&mut self, task_id: &str, dates: HammockDates, effects: &mut Effects) {
        if let HammockDates::Resolved {
            start,
            due,
            inverted: true,
        } = dates
        {
            tracing::warn!("hammock {} has inverted dates {}..{}", task_id, start, due);
            effects.inverted_hammocks.push(task_id.to_string());
        }
        let (start, due) = dates.dates();
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.start_date != start || task.due_date != due {
            task.start_date = start;
            task.due_date = due;
            log_changes!(self.config.verbosity, "hammock {}: {:?}..{:?}", task_id, start, due);
            effects.recalculated.push(task_id.to_string());
            self.bump();
        }
    }

    fn store_buffer(&mut self, task_id: &str, effects: &mut Effects) -> f64 {
        let Some(task) = self.tasks.get(task_id) else {
            return 0.0;
        };
        let due = buffer_due_date(task);
        let consumed = compute_buffer_consumption(task, &self.tasks, &self.graph);
        let Some(task) = self.tasks.get_mut(task_id) else {
            return consumed;
        };
        let changed = task.due_date != due || (task.buffer_consumed_pct - consumed).abs() > 1e-9;
        if changed {
            task.due_date = due;
            task.buffer_consumed_pct = consumed;
            log_changes!(self.config.verbosity, "buffer {}: {:.1}% consumed", task_id, consumed);
            effects.recalculated.push(task_id.to_string());
            self.bump();
        }
        consumed
    }

    fn neighbour_ids(&self, task_id: &str) -> Vec<String> {
        self.graph
            .predecessors_of(task_id, None)
            .into_iter()
            .map(|d| d.depends_on_task_id.clone())
            .chain(
                self.graph
                    .successors_of(task_id, None)
                    .into_iter()
                    .map(|d| d.task_id.clone()),
            )
            .collect()
    }
}
