//! Core data types for the dependency engine.

use chrono::{Datelike, Duration, NaiveDate};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a dependency edge. Ids are allocated in creation order, so
/// sorting by id gives the order the edges were added in.
pub type DependencyId = u64;

/// Largest lag or buffer size, in days, accepted from the host.
pub const MAX_LAG_DAYS: i64 = 36_500;

/// Years accepted for host-supplied dates.
pub const SUPPORTED_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// A date, or a date shifted by some days, outside the range the engine handles.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Date {date} shifted by {days} days is out of range")]
pub struct DateOutOfRange {
    pub date: NaiveDate,
    pub days: i64,
}

/// Shift a date by a signed number of days.
#[inline]
pub(crate) fn add_days(date: NaiveDate, days: i64) -> Result<NaiveDate, DateOutOfRange> {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or(DateOutOfRange { date, days })
}

/// `date + base + lag`.
pub(crate) fn add_lag(date: NaiveDate, base: i64, lag: i64) -> Result<NaiveDate, DateOutOfRange> {
    let days = base
        .checked_add(lag)
        .ok_or(DateOutOfRange { date, days: lag })?;
    add_days(date, days)
}

/// `date - base - lag`.
pub(crate) fn sub_lag(date: NaiveDate, base: i64, lag: i64) -> Result<NaiveDate, DateOutOfRange> {
    let days = base
        .checked_add(lag)
        .and_then(i64::checked_neg)
        .ok_or(DateOutOfRange { date, days: lag })?;
    add_days(date, days)
}

/// Reject host dates outside [`SUPPORTED_YEARS`].
pub(crate) fn check_supported(date: NaiveDate) -> Result<NaiveDate, DateOutOfRange> {
    if SUPPORTED_YEARS.contains(&date.year()) {
        Ok(date)
    } else {
        Err(DateOutOfRange { date, days: 0 })
    }
}

/// Error returned when parsing one of the engine's enums from a host string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Workflow status of a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Review,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Review => "Review",
            TaskStatus::Completed => "Completed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_completed(self) -> bool {
        self == TaskStatus::Completed
    }

    /// Completed or Cancelled: no further work will happen on the task.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Open" => Ok(TaskStatus::Open),
            "In Progress" | "InProgress" => Ok(TaskStatus::InProgress),
            "Review" => Ok(TaskStatus::Review),
            "Completed" => Ok(TaskStatus::Completed),
            "Cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ParseEnumError {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// How a task's dates are resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SchedulingType {
    /// Dates are set by the user and moved by cascades.
    #[default]
    Fixed,
    /// Dates span the gap between predecessors and successors; never set directly.
    Hammock,
    /// Explicit padding; absorbs upstream delay instead of moving.
    Buffer,
}

impl SchedulingType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulingType::Fixed => "Fixed",
            SchedulingType::Hammock => "Hammock",
            SchedulingType::Buffer => "Buffer",
        }
    }
}

impl fmt::Display for SchedulingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Fixed" | "" => Ok(SchedulingType::Fixed),
            "Hammock" => Ok(SchedulingType::Hammock),
            "Buffer" => Ok(SchedulingType::Buffer),
            other => Err(ParseEnumError {
                kind: "scheduling type",
                value: other.to_string(),
            }),
        }
    }
}

/// Which of a task's two dates a value refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DateField {
    Start,
    Due,
}

impl DateField {
    pub fn as_str(self) -> &'static str {
        match self {
            DateField::Start => "start_date",
            DateField::Due => "due_date",
        }
    }
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateField {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start_date" | "start" => Ok(DateField::Start),
            "due_date" | "due" | "end_date" | "end" => Ok(DateField::Due),
            other => Err(ParseEnumError {
                kind: "date field",
                value: other.to_string(),
            }),
        }
    }
}

/// Link type between a predecessor and its successor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DependencyType {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

impl DependencyType {
    pub fn short_code(self) -> &'static str {
        match self {
            DependencyType::FinishToStart => "FS",
            DependencyType::StartToStart => "SS",
            DependencyType::FinishToFinish => "FF",
            DependencyType::StartToFinish => "SF",
        }
    }

    /// The successor date this link constrains.
    pub fn driven_field(self) -> DateField {
        match self {
            DependencyType::FinishToStart | DependencyType::StartToStart => DateField::Start,
            DependencyType::FinishToFinish | DependencyType::StartToFinish => DateField::Due,
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_code())
    }
}

impl FromStr for DependencyType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "FS" | "Finish to Start" => Ok(DependencyType::FinishToStart),
            "SS" | "Start to Start" => Ok(DependencyType::StartToStart),
            "FF" | "Finish to Finish" => Ok(DependencyType::FinishToFinish),
            "SF" | "Start to Finish" => Ok(DependencyType::StartToFinish),
            other => Err(ParseEnumError {
                kind: "dependency type",
                value: other.to_string(),
            }),
        }
    }
}

/// Project policy for propagating date changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DependencyMode {
    /// Cascades are previewed and wait for confirmation.
    #[default]
    Flexible,
    /// Cascades are applied immediately.
    Strict,
    /// Cascades never happen.
    Off,
}

impl DependencyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyMode::Flexible => "Flexible",
            DependencyMode::Strict => "Strict",
            DependencyMode::Off => "Off",
        }
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            // Hosts that never set a mode get the Flexible default.
            "Flexible" | "" => Ok(DependencyMode::Flexible),
            "Strict" => Ok(DependencyMode::Strict),
            "Off" => Ok(DependencyMode::Off),
            other => Err(ParseEnumError {
                kind: "dependency mode",
                value: other.to_string(),
            }),
        }
    }
}

/// A task as seen by the engine.
///
/// `is_blocked` and `buffer_consumed_pct` are derived; the host may persist
/// them, but the engine recomputes them from the other fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    /// Percent complete, 0-100.
    pub progress: u8,
    pub scheduling_type: SchedulingType,
    pub task_group: Option<String>,
    pub depends_on_group: Option<String>,
    /// Buffer length in days (Buffer tasks only).
    pub buffer_size_days: i64,
    pub buffer_consumed_pct: f64,
    pub is_blocked: bool,
    pub auto_trail_start: bool,
    pub assignee: Option<String>,
    pub completed_date: Option<NaiveDate>,
}

impl Task {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            start_date: None,
            due_date: None,
            status: TaskStatus::Open,
            progress: 0,
            scheduling_type: SchedulingType::Fixed,
            task_group: None,
            depends_on_group: None,
            buffer_size_days: 0,
            buffer_consumed_pct: 0.0,
            is_blocked: false,
            auto_trail_start: false,
            assignee: None,
            completed_date: None,
        }
    }

    pub fn with_dates(mut self, start: NaiveDate, due: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.due_date = Some(due);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_scheduling_type(mut self, scheduling_type: SchedulingType) -> Self {
        self.scheduling_type = scheduling_type;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.task_group = Some(group.into());
        self
    }

    pub fn with_group_dependency(mut self, group: impl Into<String>) -> Self {
        self.depends_on_group = Some(group.into());
        self
    }

    /// Make this a Buffer task starting at `start`.
    pub fn with_buffer(mut self, start: NaiveDate, size_days: i64) -> Self {
        self.scheduling_type = SchedulingType::Buffer;
        self.start_date = Some(start);
        self.buffer_size_days = size_days;
        self.due_date = add_days(start, size_days).ok();
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_auto_trail_start(mut self, enabled: bool) -> Self {
        self.auto_trail_start = enabled;
        self
    }

    pub fn date(&self, field: DateField) -> Option<NaiveDate> {
        match field {
            DateField::Start => self.start_date,
            DateField::Due => self.due_date,
        }
    }

    pub fn set_date(&mut self, field: DateField, value: Option<NaiveDate>) {
        match field {
            DateField::Start => self.start_date = value,
            DateField::Due => self.due_date = value,
        }
    }

    /// `due_date - start_date` in days, when both are set.
    pub fn duration_days(&self) -> Option<i64> {
        match (self.start_date, self.due_date) {
            (Some(start), Some(due)) => Some((due - start).num_days()),
            _ => None,
        }
    }
}

/// A typed edge: `task_id` (successor) depends on `depends_on_task_id` (predecessor).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub id: DependencyId,
    pub task_id: String,
    pub depends_on_task_id: String,
    pub dependency_type: DependencyType,
    /// Day offset after the anchor date. Negative values model overlap.
    pub lag_days: i64,
}

/// Project settings the engine reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub dependency_mode: DependencyMode,
    /// Optional committed end date; bounds the critical-path backward pass.
    pub end_date: Option<NaiveDate>,
}

impl Project {
    pub fn new(id: impl Into<String>, dependency_mode: DependencyMode) -> Self {
        Self {
            id: id.into(),
            dependency_mode,
            end_date: None,
        }
    }
}

/// Derived blocked state of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockedState {
    pub task_id: String,
    pub is_blocked: bool,
    /// Incomplete FS predecessors in dependency creation order, followed by
    /// incomplete members of the task's `depends_on_group`.
    pub blocking: Vec<String>,
    /// True when the group dependency alone is enough to block.
    pub blocked_by_group: bool,
}

/// Signal for the notification collaborator: a task just stopped being blocked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnblockedEvent {
    pub task_id: String,
    pub assignee: Option<String>,
}

/// One task's date move inside a cascade.
///
/// Both dates move by `days_shift`, so the task's duration is unchanged.
/// `field` is the date the incoming link constrains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeChange {
    pub task_id: String,
    pub field: DateField,
    pub days_shift: i64,
    pub old_start: Option<NaiveDate>,
    pub old_due: Option<NaiveDate>,
    pub new_start: Option<NaiveDate>,
    pub new_due: Option<NaiveDate>,
    /// Type and lag of the link the shift arrived through (None for the edited task).
    pub dependency_type: Option<DependencyType>,
    pub lag_days: i64,
}

impl CascadeChange {
    /// Build a change that moves both of `task`'s dates by `days_shift`.
    pub fn shift(
        task: &Task,
        field: DateField,
        days_shift: i64,
        dependency_type: Option<DependencyType>,
        lag_days: i64,
    ) -> Result<Self, DateOutOfRange> {
        Ok(Self {
            task_id: task.id.clone(),
            field,
            days_shift,
            old_start: task.start_date,
            old_due: task.due_date,
            new_start: task.start_date.map(|d| add_days(d, days_shift)).transpose()?,
            new_due: task.due_date.map(|d| add_days(d, days_shift)).transpose()?,
            dependency_type,
            lag_days,
        })
    }

    pub fn old_value(&self) -> Option<NaiveDate> {
        match self.field {
            DateField::Start => self.old_start,
            DateField::Due => self.old_due,
        }
    }

    pub fn new_value(&self) -> Option<NaiveDate> {
        match self.field {
            DateField::Start => self.new_start,
            DateField::Due => self.new_due,
        }
    }
}
