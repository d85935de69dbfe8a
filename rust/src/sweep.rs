//! Daily maintenance pass.
//!
//! Trails the start of untouched tasks that opted in, then brings every
//! derived field up to date. Running it twice on the same day changes nothing
//! the second time.

use chrono::NaiveDate;
use rustc_hash::FxHashSet;

use crate::log_changes;
use crate::models::{
    add_days, CascadeChange, DateField, DateOutOfRange, SchedulingType, TaskStatus,
};
use crate::schedule::{Effects, Schedule};

/// What a sweep changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks whose start was moved up to today.
    pub trailed: Vec<CascadeChange>,
    pub effects: Effects,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.trailed.is_empty() && self.effects == Effects::default()
    }
}

impl Schedule {
    /// Run the maintenance pass for `today`.
    ///
    /// An Open task with no progress, `auto_trail_start` set and a start in
    /// the past is moved to start today, keeping its duration. Successors are
    /// not cascaded; a task whose trailed due date would leave the date range
    /// is left alone. Afterwards Hammock and Buffer tasks are recomputed in
    /// topological order and every task's blocked flag is re-evaluated.
    pub fn sweep(&mut self, today: NaiveDate) -> SweepReport {
        let verbosity = self.config().verbosity;
        let candidates: Vec<CascadeChange> = self
            .tasks()
            .filter(|t| {
                t.auto_trail_start
                    && t.status == TaskStatus::Open
                    && t.progress == 0
                    && t.scheduling_type != SchedulingType::Hammock
            })
            .filter_map(|t| {
                let start = t.start_date.filter(|s| *s < today)?;
                let shift = (today - start).num_days();
                let trail = || -> Result<CascadeChange, DateOutOfRange> {
                    let mut change = CascadeChange::shift(t, DateField::Start, shift, None, 0)?;
                    if t.scheduling_type == SchedulingType::Buffer {
                        change.new_due = Some(add_days(today, t.buffer_size_days)?);
                    }
                    Ok(change)
                };
                trail()
                    .map_err(|e| tracing::warn!("{}: not trailing start: {}", t.id, e))
                    .ok()
            })
            .collect();

        for change in &candidates {
            log_changes!(
                verbosity,
                "{}: trailing start {:?} -> {:?}",
                change.task_id,
                change.old_start,
                change.new_start
            );
            self.write_dates(change);
        }

        let computed: FxHashSet<String> = self
            .tasks()
            .filter(|t| t.scheduling_type != SchedulingType::Fixed)
            .map(|t| t.id.clone())
            .collect();
        let mut effects = self.recompute_in_order(&computed);

        let all: Vec<String> = self.graph().task_ids().map(str::to_string).collect();
        let blocked = self.refresh_blocked(&all);
        effects.unblocked.extend(blocked.unblocked);

        SweepReport {
            trailed: candidates,
            effects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{DependencyMode, DependencyType, Project, Task};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn schedule() -> Schedule {
        Schedule::new(
            Project::new("p", DependencyMode::Flexible),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_trails_only_untouched_open_tasks() {
        let mut s = schedule();
        s.upsert_task(
            Task::new("late", "p")
                .with_dates(date(3, 1), date(3, 5))
                .with_auto_trail_start(true),
        )
        .unwrap();
        s.upsert_task(
            Task::new("started", "p")
                .with_dates(date(3, 1), date(3, 5))
                .with_status(TaskStatus::InProgress)
                .with_auto_trail_start(true),
        )
        .unwrap();
        s.upsert_task(Task::new("manual", "p").with_dates(date(3, 1), date(3, 5)))
            .unwrap();

        let report = s.sweep(date(3, 10));
        assert_eq!(report.trailed.len(), 1);
        let late = s.task("late").unwrap();
        assert_eq!((late.start_date, late.due_date), (Some(date(3, 10)), Some(date(3, 14))));
        assert_eq!(s.task("started").unwrap().start_date, Some(date(3, 1)));
        assert_eq!(s.task("manual").unwrap().start_date, Some(date(3, 1)));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut s = schedule();
        s.upsert_task(
            Task::new("a", "p")
                .with_dates(date(3, 1), date(3, 5))
                .with_auto_trail_start(true),
        )
        .unwrap();
        s.upsert_task(Task::new("buf", "p").with_buffer(date(3, 6), 4))
            .unwrap();
        s.add_dependency("buf", "a", DependencyType::FinishToStart, 0)
            .unwrap();

        let first = s.sweep(date(3, 3));
        assert!(!first.is_empty());
        let revision = s.revision();
        let snapshot: Vec<Task> = s.tasks().cloned().collect();

        let second = s.sweep(date(3, 3));
        assert!(second.is_empty());
        assert_eq!(s.revision(), revision);
        assert_eq!(s.tasks().cloned().collect::<Vec<_>>(), snapshot);
    }

    #[test]
    fn test_sweep_refreshes_stored_blocked_flag() {
        let mut b = Task::new("b", "p");
        b.is_blocked = true;
        let tasks = vec![Task::new("a", "p").with_status(TaskStatus::Completed), b];
        let deps = vec![crate::models::Dependency {
            id: 1,
            task_id: "b".to_string(),
            depends_on_task_id: "a".to_string(),
            dependency_type: DependencyType::FinishToStart,
            lag_days: 0,
        }];
        let mut s = Schedule::load(
            Project::new("p", DependencyMode::Off),
            EngineConfig::default(),
            tasks,
            deps,
        )
        .unwrap();

        let report = s.sweep(date(3, 3));
        assert_eq!(report.effects.unblocked.len(), 1);
        assert!(!s.task("b").unwrap().is_blocked);
        assert!(s.sweep(date(3, 3)).effects.unblocked.is_empty());
    }

    #[test]
    fn test_trail_past_last_date_leaves_task() {
        let mut s = schedule();
        s.upsert_task(
            Task::new("a", "p")
                .with_dates(date(3, 1), date(3, 5))
                .with_auto_trail_start(true),
        )
        .unwrap();

        let report = s.sweep(NaiveDate::MAX);
        assert!(report.trailed.is_empty());
        let a = s.task("a").unwrap();
        assert_eq!((a.start_date, a.due_date), (Some(date(3, 1)), Some(date(3, 5))));
    }
}
