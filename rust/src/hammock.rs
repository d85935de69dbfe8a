//! Date derivation for computed task types.
//!
//! Hammock tasks stretch between their neighbours:
//! - start = latest predecessor anchor (FS: `due + 1 + lag`, SS: `start + lag`)
//! - due   = earliest FS successor anchor (`start - 1 - lag`)
//!
//! Buffer tasks keep a caller-set start and size; their due date follows the
//! size and their consumption tracks how far FS predecessors overran into them.
//!
//! An anchor that falls outside the representable date range is ignored.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use crate::config::EngineConfig;
use crate::graph::DependencyGraph;
use crate::models::{add_days, add_lag, sub_lag, DateOutOfRange, DependencyType, Task};

/// Outcome of a hammock date calculation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HammockDates {
    /// One side has no usable anchor; the task has no dates.
    Undefined {
        missing_predecessor: bool,
        missing_successor: bool,
    },
    /// Both anchors exist. `inverted` is set when `due < start`; the dates are
    /// still reported as computed.
    Resolved {
        start: NaiveDate,
        due: NaiveDate,
        inverted: bool,
    },
}

impl HammockDates {
    pub fn dates(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        match *self {
            HammockDates::Undefined { .. } => (None, None),
            HammockDates::Resolved { start, due, .. } => (Some(start), Some(due)),
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, HammockDates::Resolved { .. })
    }
}

/// Display bucket for buffer consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferHealth {
    Healthy,
    Caution,
    Critical,
}

impl BufferHealth {
    pub fn from_consumed(consumed_pct: f64, config: &EngineConfig) -> Self {
        if consumed_pct <= config.buffer_caution_pct {
            BufferHealth::Healthy
        } else if consumed_pct <= config.buffer_critical_pct {
            BufferHealth::Caution
        } else {
            BufferHealth::Critical
        }
    }
}

/// Compute the dates of a hammock task from its neighbours.
pub fn compute_hammock_dates(
    task_id: &str,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
) -> HammockDates {
    let start = graph
        .predecessors_of(task_id, None)
        .into_iter()
        .filter_map(|dep| {
            let pred = tasks.get(&dep.depends_on_task_id)?;
            let anchor = match dep.dependency_type {
                DependencyType::FinishToStart => add_lag(pred.due_date?, 1, dep.lag_days),
                DependencyType::StartToStart => add_days(pred.start_date?, dep.lag_days),
                _ => return None,
            };
            in_range(task_id, anchor)
        })
        .max();

    let due = graph
        .successors_of(task_id, Some(DependencyType::FinishToStart))
        .into_iter()
        .filter_map(|dep| {
            let succ = tasks.get(&dep.task_id)?;
            in_range(task_id, sub_lag(succ.start_date?, 1, dep.lag_days))
        })
        .min();

    match (start, due) {
        (Some(start), Some(due)) => HammockDates::Resolved {
            start,
            due,
            inverted: due < start,
        },
        _ => HammockDates::Undefined {
            missing_predecessor: start.is_none(),
            missing_successor: due.is_none(),
        },
    }
}

fn in_range(task_id: &str, anchor: Result<NaiveDate, DateOutOfRange>) -> Option<NaiveDate> {
    anchor
        .map_err(|e| tracing::warn!("hammock {}: ignoring anchor: {}", task_id, e))
        .ok()
}

/// Due date of a buffer task: `start + buffer_size_days`.
pub fn buffer_due_date(task: &Task) -> Option<NaiveDate> {
    add_days(task.start_date?, task.buffer_size_days).ok()
}

/// Percentage of a buffer consumed by overrunning FS predecessors.
///
/// Each predecessor is expected to finish by `buffer.start - 1 - lag`; days
/// past that are summed and divided by the buffer size. Clamped to 0-100.
pub fn compute_buffer_consumption(
    task: &Task,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
) -> f64 {
    if task.buffer_size_days <= 0 {
        return 0.0;
    }
    let Some(start) = task.start_date else {
        return 0.0;
    };

    let total_delay: i64 = graph
        .predecessors_of(&task.id, Some(DependencyType::FinishToStart))
        .into_iter()
        .filter_map(|dep| {
            let pred_due = tasks.get(&dep.depends_on_task_id)?.due_date?;
            let expected_end = sub_lag(start, 1, dep.lag_days).ok()?;
            Some((pred_due - expected_end).num_days().max(0))
        })
        .sum();

    (100.0 * total_delay as f64 / task.buffer_size_days as f64).clamp(0.0, 100.0)
}
