//! Dependency scheduling engine for a project task tracker.
//!
//! Tasks are linked by typed, lagged dependencies (FS, SS, FF, SF) that form a
//! DAG per project. The engine keeps that graph acyclic, derives each task's
//! blocked state, computes Hammock and Buffer dates, propagates date changes
//! to successors according to the project's dependency mode, and reports the
//! critical path. Persistence, notification delivery and the UI stay with the
//! host; the optional `python` feature exposes the engine to it.

pub mod blocked;
pub mod cascade;
mod config;
pub mod critical_path;
pub mod graph;
pub mod hammock;
pub mod logging;
mod models;
pub mod schedule;
pub mod sweep;

#[cfg(feature = "python")]
mod python;

pub use blocked::GroupStatus;
pub use cascade::{CascadeError, CascadePlan, CascadeTrigger};
pub use config::EngineConfig;
pub use critical_path::{CriticalPathError, CriticalPathResult, TaskTiming};
pub use graph::{DependencyGraph, GraphError};
pub use hammock::{BufferHealth, HammockDates};
pub use models::{
    BlockedState, CascadeChange, DateField, DateOutOfRange, Dependency, DependencyId, DependencyMode,
    DependencyType, ParseEnumError, Project, SchedulingType, Task, TaskStatus, UnblockedEvent,
    MAX_LAG_DAYS,
};
pub use schedule::{
    ApplyReport, BlockedEvaluation, CascadeOutcome, Effects, PendingCascade, Result, Schedule,
    ScheduleError, SharedSchedule, StatusOutcome, TaskDependencies,
};
pub use sweep::SweepReport;
