//! Python bindings.
//!
//! The host application talks to one [`Schedule`] per project through the
//! `Schedule` class below. Enum values cross the boundary as strings
//! ("Finish to Start" or "FS", "Flexible", "Completed", ...), dates as
//! `datetime.date`, and engine errors surface as `ValueError`.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use chrono::NaiveDate;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::collections::HashMap;
use std::sync::MutexGuard;

use crate::cascade::CascadePlan;
use crate::config::EngineConfig;
use crate::models::{
    CascadeChange, DateField, Dependency, DependencyMode, DependencyType, Project, SchedulingType,
    Task, TaskStatus, UnblockedEvent,
};
use crate::schedule::{ApplyReport, CascadeOutcome, Effects, Schedule, SharedSchedule};

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse<T>(value: &str) -> PyResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(value_error)
}

/// Task record (PyO3 wrapper).
#[pyclass(name = "Task")]
#[derive(Clone, Debug)]
pub struct PyTask {
    #[pyo3(get, set)]
    pub id: String,
    #[pyo3(get, set)]
    pub project_id: String,
    #[pyo3(get, set)]
    pub start_date: Option<NaiveDate>,
    #[pyo3(get, set)]
    pub due_date: Option<NaiveDate>,
    #[pyo3(get, set)]
    pub status: String,
    #[pyo3(get, set)]
    pub progress: u8,
    #[pyo3(get, set)]
    pub scheduling_type: String,
    #[pyo3(get, set)]
    pub task_group: Option<String>,
    #[pyo3(get, set)]
    pub depends_on_group: Option<String>,
    #[pyo3(get, set)]
    pub buffer_size_days: i64,
    #[pyo3(get)]
    pub buffer_consumed_pct: f64,
    #[pyo3(get, set)]
    pub is_blocked: bool,
    #[pyo3(get, set)]
    pub auto_trail_start: bool,
    #[pyo3(get, set)]
    pub assignee: Option<String>,
    #[pyo3(get, set)]
    pub completed_date: Option<NaiveDate>,
}

#[pymethods]
impl PyTask {
    #[new]
    #[pyo3(signature = (id, project_id, start_date=None, due_date=None, status="Open".to_string(), scheduling_type="Fixed".to_string(), buffer_size_days=0))]
    fn new(
        id: String,
        project_id: String,
        start_date: Option<NaiveDate>,
        due_date: Option<NaiveDate>,
        status: String,
        scheduling_type: String,
        buffer_size_days: i64,
    ) -> Self {
        Self {
            id,
            project_id,
            start_date,
            due_date,
            status,
            progress: 0,
            scheduling_type,
            task_group: None,
            depends_on_group: None,
            buffer_size_days,
            buffer_consumed_pct: 0.0,
            is_blocked: false,
            auto_trail_start: false,
            assignee: None,
            completed_date: None,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Task(id={:?}, status={}, start={:?}, due={:?}, blocked={})",
            self.id, self.status, self.start_date, self.due_date, self.is_blocked
        )
    }
}

impl From<&Task> for PyTask {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            project_id: task.project_id.clone(),
            start_date: task.start_date,
            due_date: task.due_date,
            status: task.status.to_string(),
            progress: task.progress,
            scheduling_type: task.scheduling_type.to_string(),
            task_group: task.task_group.clone(),
            depends_on_group: task.depends_on_group.clone(),
            buffer_size_days: task.buffer_size_days,
            buffer_consumed_pct: task.buffer_consumed_pct,
            is_blocked: task.is_blocked,
            auto_trail_start: task.auto_trail_start,
            assignee: task.assignee.clone(),
            completed_date: task.completed_date,
        }
    }
}

impl PyTask {
    fn to_task(&self) -> PyResult<Task> {
        Ok(Task {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            start_date: self.start_date,
            due_date: self.due_date,
            status: parse::<TaskStatus>(&self.status)?,
            progress: self.progress.min(100),
            scheduling_type: parse::<SchedulingType>(&self.scheduling_type)?,
            task_group: self.task_group.clone(),
            depends_on_group: self.depends_on_group.clone(),
            buffer_size_days: self.buffer_size_days,
            buffer_consumed_pct: self.buffer_consumed_pct,
            is_blocked: self.is_blocked,
            auto_trail_start: self.auto_trail_start,
            assignee: self.assignee.clone(),
            completed_date: self.completed_date,
        })
    }
}

/// Dependency record (read-only).
#[pyclass(name = "Dependency")]
#[derive(Clone, Debug)]
pub struct PyDependency {
    #[pyo3(get)]
    pub id: u64,
    #[pyo3(get)]
    pub task_id: String,
    #[pyo3(get)]
    pub depends_on_task_id: String,
    #[pyo3(get)]
    pub dependency_type: String,
    #[pyo3(get)]
    pub lag_days: i64,
}

impl From<&Dependency> for PyDependency {
    fn from(dep: &Dependency) -> Self {
        Self {
            id: dep.id,
            task_id: dep.task_id.clone(),
            depends_on_task_id: dep.depends_on_task_id.clone(),
            dependency_type: dep.dependency_type.to_string(),
            lag_days: dep.lag_days,
        }
    }
}

/// One proposed or applied date move.
#[pyclass(name = "CascadeChange")]
#[derive(Clone, Debug)]
pub struct PyCascadeChange {
    #[pyo3(get)]
    pub task_id: String,
    #[pyo3(get)]
    pub field: String,
    #[pyo3(get)]
    pub days_shift: i64,
    #[pyo3(get)]
    pub old_value: Option<NaiveDate>,
    #[pyo3(get)]
    pub new_value: Option<NaiveDate>,
    #[pyo3(get)]
    pub new_start: Option<NaiveDate>,
    #[pyo3(get)]
    pub new_due: Option<NaiveDate>,
    #[pyo3(get)]
    pub dependency_type: Option<String>,
    #[pyo3(get)]
    pub lag_days: i64,
}

impl From<&CascadeChange> for PyCascadeChange {
    fn from(change: &CascadeChange) -> Self {
        Self {
            task_id: change.task_id.clone(),
            field: change.field.to_string(),
            days_shift: change.days_shift,
            old_value: change.old_value(),
            new_value: change.new_value(),
            new_start: change.new_start,
            new_due: change.new_due,
            dependency_type: change.dependency_type.map(|t| t.to_string()),
            lag_days: change.lag_days,
        }
    }
}

/// A cascade preview. Pass it back to `Schedule.apply_cascade` to commit it.
#[pyclass(name = "CascadePlan")]
#[derive(Clone, Debug)]
pub struct PyCascadePlan {
    inner: CascadePlan,
}

#[pymethods]
impl PyCascadePlan {
    #[getter]
    fn revision(&self) -> u64 {
        self.inner.revision
    }

    #[getter]
    fn changes(&self) -> Vec<PyCascadeChange> {
        self.inner
            .origin
            .iter()
            .chain(&self.inner.changes)
            .map(PyCascadeChange::from)
            .collect()
    }

    fn __len__(&self) -> usize {
        self.inner.affected_task_ids().len()
    }
}

/// Outcome of a mutation, flattened for the host.
#[pyclass(name = "Outcome")]
#[derive(Clone, Debug, Default)]
pub struct PyOutcome {
    /// "skipped", "applied" or "pending".
    #[pyo3(get)]
    pub state: String,
    /// Proposed moves when pending, trailed tasks after a sweep.
    #[pyo3(get)]
    pub changes: Vec<PyCascadeChange>,
    /// Tasks whose dates were written.
    #[pyo3(get)]
    pub updated: Vec<String>,
    #[pyo3(get)]
    pub revision: u64,
    /// (task_id, assignee) pairs for tasks that just became unblocked.
    #[pyo3(get)]
    pub unblocked: Vec<(String, Option<String>)>,
    #[pyo3(get)]
    pub recalculated: Vec<String>,
    #[pyo3(get)]
    pub warnings: Vec<String>,
}

impl PyOutcome {
    fn from_effects(state: &str, effects: &Effects, revision: u64) -> Self {
        Self {
            state: state.to_string(),
            changes: Vec::new(),
            updated: Vec::new(),
            revision,
            unblocked: effects.unblocked.iter().map(unblocked_pair).collect(),
            recalculated: effects.recalculated.clone(),
            warnings: effects
                .inverted_hammocks
                .iter()
                .map(|id| format!("hammock {id} ends before it starts"))
                .collect(),
        }
    }

    fn from_report(report: &ApplyReport, revision: u64) -> Self {
        let mut result = Self::from_effects("applied", &report.effects, revision);
        result.updated = report.updated_tasks.clone();
        result
    }

    fn from_cascade(outcome: &CascadeOutcome, revision: u64) -> Self {
        match outcome {
            CascadeOutcome::Skipped => Self::from_effects("skipped", &Effects::default(), revision),
            CascadeOutcome::Applied(report) => Self::from_report(report, revision),
            CascadeOutcome::Pending(plan) => {
                let mut result = Self::from_effects("pending", &Effects::default(), plan.revision);
                result.changes = plan.changes.iter().map(PyCascadeChange::from).collect();
                result
            }
        }
    }

    fn with_effects(mut self, effects: &Effects) -> Self {
        self.unblocked
            .extend(effects.unblocked.iter().map(unblocked_pair));
        self
    }
}

fn unblocked_pair(event: &UnblockedEvent) -> (String, Option<String>) {
    (event.task_id.clone(), event.assignee.clone())
}

/// Critical path summary.
#[pyclass(name = "CriticalPath")]
#[derive(Clone, Debug)]
pub struct PyCriticalPath {
    #[pyo3(get)]
    pub critical_tasks: Vec<String>,
    #[pyo3(get)]
    pub slack: HashMap<String, i64>,
    #[pyo3(get)]
    pub project_length: i64,
}

/// Scheduling session for one project.
#[pyclass(name = "Schedule")]
pub struct PySchedule {
    inner: SharedSchedule,
}

impl PySchedule {
    fn lock(&self) -> PyResult<MutexGuard<'_, Schedule>> {
        self.inner
            .lock()
            .map_err(|_| PyRuntimeError::new_err("schedule lock poisoned"))
    }
}

#[pymethods]
impl PySchedule {
    #[new]
    #[pyo3(signature = (project_id, dependency_mode="Flexible", project_end=None, verbosity=0, max_cascade_depth=100))]
    fn new(
        project_id: String,
        dependency_mode: &str,
        project_end: Option<NaiveDate>,
        verbosity: u8,
        max_cascade_depth: usize,
    ) -> PyResult<Self> {
        let mut project = Project::new(project_id, parse::<DependencyMode>(dependency_mode)?);
        project.end_date = project_end;
        let config = EngineConfig::default()
            .with_verbosity(verbosity)
            .with_max_cascade_depth(max_cascade_depth);
        Ok(Self {
            inner: Schedule::new(project, config).into_shared(),
        })
    }

    #[getter]
    fn revision(&self) -> PyResult<u64> {
        Ok(self.lock()?.revision())
    }

    fn set_dependency_mode(&self, mode: &str) -> PyResult<()> {
        self.lock()?.set_dependency_mode(parse(mode)?);
        Ok(())
    }

    fn upsert_task(&self, task: PyRef<'_, PyTask>) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let effects = schedule.upsert_task(task.to_task()?).map_err(value_error)?;
        Ok(PyOutcome::from_effects("applied", &effects, schedule.revision()))
    }

    fn remove_task(&self, task_id: &str) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let (_, effects) = schedule.remove_task(task_id).map_err(value_error)?;
        Ok(PyOutcome::from_effects("applied", &effects, schedule.revision()))
    }

    fn task(&self, task_id: &str) -> PyResult<Option<PyTask>> {
        Ok(self.lock()?.task(task_id).map(PyTask::from))
    }

    fn tasks(&self) -> PyResult<Vec<PyTask>> {
        Ok(self.lock()?.tasks().map(PyTask::from).collect())
    }

    #[pyo3(signature = (task_id, depends_on, dependency_type="Finish to Start", lag_days=0))]
    fn add_dependency(
        &self,
        task_id: &str,
        depends_on: &str,
        dependency_type: &str,
        lag_days: i64,
    ) -> PyResult<(u64, PyOutcome)> {
        let dependency_type = parse::<DependencyType>(dependency_type)?;
        let mut schedule = self.lock()?;
        let (id, effects) = schedule
            .add_dependency(task_id, depends_on, dependency_type, lag_days)
            .map_err(value_error)?;
        Ok((id, PyOutcome::from_effects("applied", &effects, schedule.revision())))
    }

    fn remove_dependency(&self, dependency_id: u64) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let effects = schedule.remove_dependency(dependency_id).map_err(value_error)?;
        Ok(PyOutcome::from_effects("applied", &effects, schedule.revision()))
    }

    #[pyo3(signature = (dependency_id, dependency_type=None, lag_days=None))]
    fn update_dependency(
        &self,
        dependency_id: u64,
        dependency_type: Option<&str>,
        lag_days: Option<i64>,
    ) -> PyResult<PyOutcome> {
        let dependency_type = dependency_type.map(parse::<DependencyType>).transpose()?;
        let mut schedule = self.lock()?;
        let effects = schedule
            .update_dependency(dependency_id, dependency_type, lag_days)
            .map_err(value_error)?;
        Ok(PyOutcome::from_effects("applied", &effects, schedule.revision()))
    }

    /// Return the cycle path the link would create, or None.
    fn check_circular_dependency(&self, task_id: &str, depends_on: &str) -> PyResult<Option<Vec<String>>> {
        Ok(self.lock()?.check_circular_dependency(task_id, depends_on))
    }

    /// Return (predecessors, successors, is_blocked).
    fn dependencies_of(&self, task_id: &str) -> PyResult<(Vec<PyDependency>, Vec<PyDependency>, bool)> {
        let deps = self.lock()?.dependencies_of(task_id).map_err(value_error)?;
        Ok((
            deps.predecessors.iter().map(PyDependency::from).collect(),
            deps.successors.iter().map(PyDependency::from).collect(),
            deps.is_blocked,
        ))
    }

    /// Evaluate and record the blocked state. Returns (is_blocked, blocking_ids, unblocked_now).
    fn evaluate_blocked(&self, task_id: &str) -> PyResult<(bool, Vec<String>, bool)> {
        let evaluation = self.lock()?.evaluate_blocked(task_id).map_err(value_error)?;
        Ok((
            evaluation.state.is_blocked,
            evaluation.state.blocking,
            evaluation.unblocked.is_some(),
        ))
    }

    /// Return (total, completed, incomplete, is_complete).
    fn group_status(&self, group: &str) -> PyResult<(usize, usize, usize, bool)> {
        let status = self.lock()?.group_status(group);
        Ok((status.total, status.completed, status.incomplete, status.is_complete))
    }

    fn set_status(&self, task_id: &str, status: &str, today: NaiveDate) -> PyResult<PyOutcome> {
        let status = parse::<TaskStatus>(status)?;
        let mut schedule = self.lock()?;
        let outcome = schedule.set_status(task_id, status, today).map_err(value_error)?;
        Ok(PyOutcome::from_cascade(&outcome.cascade, schedule.revision()).with_effects(&outcome.effects))
    }

    fn preview_cascade(&self, task_id: &str, field: &str, new_value: NaiveDate) -> PyResult<PyCascadePlan> {
        let field = parse::<DateField>(field)?;
        let plan = self
            .lock()?
            .preview_cascade(task_id, field, new_value)
            .map_err(value_error)?;
        Ok(PyCascadePlan { inner: plan })
    }

    fn apply_cascade(&self, plan: PyRef<'_, PyCascadePlan>) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let report = schedule.apply_cascade(&plan.inner).map_err(value_error)?;
        Ok(PyOutcome::from_report(&report, schedule.revision()))
    }

    fn edit_task_dates(&self, task_id: &str, field: &str, new_value: NaiveDate) -> PyResult<PyOutcome> {
        let field = parse::<DateField>(field)?;
        let mut schedule = self.lock()?;
        let outcome = schedule
            .edit_task_dates(task_id, field, new_value)
            .map_err(value_error)?;
        Ok(PyOutcome::from_cascade(&outcome, schedule.revision()))
    }

    fn confirm_pending_cascade(&self) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let report = schedule.confirm_pending_cascade().map_err(value_error)?;
        Ok(PyOutcome::from_report(&report, schedule.revision()))
    }

    #[pyo3(signature = (revert=false))]
    fn discard_pending_cascade(&self, revert: bool) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let effects = schedule.discard_pending_cascade(revert).map_err(value_error)?;
        Ok(PyOutcome::from_effects("skipped", &effects, schedule.revision()))
    }

    fn sweep(&self, today: NaiveDate) -> PyResult<PyOutcome> {
        let mut schedule = self.lock()?;
        let report = schedule.sweep(today);
        let mut outcome = PyOutcome::from_effects("applied", &report.effects, schedule.revision());
        outcome.changes = report.trailed.iter().map(PyCascadeChange::from).collect();
        Ok(outcome)
    }

    fn recalculate_computed_dates(&self, task_id: &str) -> PyResult<(Option<NaiveDate>, Option<NaiveDate>)> {
        let dates = self
            .lock()?
            .recalculate_computed_dates(task_id)
            .map_err(value_error)?;
        Ok(dates.map_or((None, None), |d| d.dates()))
    }

    fn recalculate_buffer_consumption(&self, task_id: &str) -> PyResult<Option<f64>> {
        self.lock()?
            .recalculate_buffer_consumption(task_id)
            .map_err(value_error)
    }

    fn critical_path(&self) -> PyResult<PyCriticalPath> {
        let result = self.lock()?.compute_critical_path().map_err(value_error)?;
        Ok(PyCriticalPath {
            slack: result
                .task_timings
                .iter()
                .map(|(id, timing)| (id.clone(), timing.slack))
                .collect(),
            critical_tasks: result.critical_path_tasks,
            project_length: result.project_length,
        })
    }
}

/// The orga_deps Python module.
#[pymodule]
fn orga_deps(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTask>()?;
    m.add_class::<PyDependency>()?;
    m.add_class::<PyCascadeChange>()?;
    m.add_class::<PyCascadePlan>()?;
    m.add_class::<PyOutcome>()?;
    m.add_class::<PyCriticalPath>()?;
    m.add_class::<PySchedule>()?;
    Ok(())
}
