#![allow(dead_code)]

use chrono::NaiveDate;
use orga_deps::{DependencyMode, EngineConfig, Project, Schedule, Task};

pub fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, m, d).unwrap()
}

pub fn day(offset: i64) -> NaiveDate {
    date(1, 1) + chrono::Duration::days(offset)
}

pub fn schedule(mode: DependencyMode) -> Schedule {
    Schedule::new(Project::new("proj", mode), EngineConfig::default())
}

pub fn fixed(id: &str, start: NaiveDate, due: NaiveDate) -> Task {
    Task::new(id, "proj").with_dates(start, due)
}

/// Insert `tasks` into `schedule`, panicking on rejection.
pub fn insert_all(schedule: &mut Schedule, tasks: Vec<Task>) {
    for task in tasks {
        schedule.upsert_task(task).unwrap();
    }
}
