//! Blocked-state evaluation.
//!
//! A task is blocked while any Finish-to-Start predecessor is not Completed, or
//! while any other member of the group named by its `depends_on_group` is still
//! open. SS/FF/SF links never block.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::DependencyGraph;
use crate::models::{BlockedState, DependencyType, Task};

/// Completion summary of a task group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStatus {
    pub total: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub is_complete: bool,
}

/// Derive the blocked state of `task` from the current statuses.
pub fn evaluate_blocked(
    task: &Task,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
) -> BlockedState {
    let mut blocking: Vec<String> = graph
        .predecessors_of(&task.id, Some(DependencyType::FinishToStart))
        .into_iter()
        .filter(|dep| {
            tasks
                .get(&dep.depends_on_task_id)
                .map_or(true, |pred| !pred.status.is_completed())
        })
        .map(|dep| dep.depends_on_task_id.clone())
        .collect();

    let mut blocked_by_group = false;
    if let Some(group) = task.depends_on_group.as_deref() {
        let open_members = open_group_members(group, &task.project_id, Some(&task.id), tasks, graph);
        blocked_by_group = !open_members.is_empty();
        for member in open_members {
            if !blocking.iter().any(|b| b == member) {
                blocking.push(member.to_string());
            }
        }
    }

    BlockedState {
        task_id: task.id.clone(),
        is_blocked: !blocking.is_empty(),
        blocking,
        blocked_by_group,
    }
}

/// Tasks whose blocked state may change when `task_id`'s status changes:
/// FS successors, then tasks depending on its group. Registration order, no duplicates.
pub fn dependents_for_reevaluation(
    task_id: &str,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
) -> Vec<String> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut result = Vec::new();

    for dep in graph.successors_of(task_id, Some(DependencyType::FinishToStart)) {
        if seen.insert(dep.task_id.as_str()) {
            result.push(dep.task_id.clone());
        }
    }

    let Some(task) = tasks.get(task_id) else {
        return result;
    };
    if let Some(group) = task.task_group.as_deref() {
        for id in graph.task_ids() {
            let Some(candidate) = tasks.get(id) else {
                continue;
            };
            if candidate.id != task.id
                && candidate.project_id == task.project_id
                && candidate.depends_on_group.as_deref() == Some(group)
                && seen.insert(id)
            {
                result.push(id.to_string());
            }
        }
    }
    result
}

/// Completion counts for the members of `group` in `project_id`.
///
/// Cancelled members count as done.
pub fn group_status(
    group: &str,
    project_id: &str,
    tasks: &FxHashMap<String, Task>,
    graph: &DependencyGraph,
) -> GroupStatus {
    let members: Vec<&Task> = graph
        .task_ids()
        .filter_map(|id| tasks.get(id))
        .filter(|t| t.project_id == project_id && t.task_group.as_deref() == Some(group))
        .collect();
    let completed = members.iter().filter(|t| t.status.is_terminal()).count();
    GroupStatus {
        total: members.len(),
        completed,
        incomplete: members.len() - completed,
        is_complete: completed == members.len(),
    }
}

fn open_group_members<'a>(
    group: &str,
    project_id: &str,
    exclude: Option<&str>,
    tasks: &'a FxHashMap<String, Task>,
    graph: &'a DependencyGraph,
) -> Vec<&'a str> {
    graph
        .task_ids()
        .filter(|id| Some(*id) != exclude)
        .filter_map(|id| tasks.get(id))
        .filter(|t| {
            t.project_id == project_id
                && t.task_group.as_deref() == Some(group)
                && !t.status.is_terminal()
        })
        .map(|t| t.id.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    fn setup(tasks: Vec<Task>) -> (FxHashMap<String, Task>, DependencyGraph) {
        let mut graph = DependencyGraph::new();
        let mut map = FxHashMap::default();
        for task in tasks {
            graph.add_task(&task.id);
            map.insert(task.id.clone(), task);
        }
        (map, graph)
    }

    #[test]
    fn test_fs_predecessor_blocks_until_completed() {
        let (mut tasks, mut graph) = setup(vec![Task::new("a", "p"), Task::new("b", "p")]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();

        let state = evaluate_blocked(&tasks["b"], &tasks, &graph);
        assert!(state.is_blocked);
        assert_eq!(state.blocking, vec!["a".to_string()]);

        tasks.get_mut("a").unwrap().status = TaskStatus::Completed;
        let state = evaluate_blocked(&tasks["b"], &tasks, &graph);
        assert!(!state.is_blocked);
        assert!(state.blocking.is_empty());
    }

    #[test]
    fn test_non_fs_links_do_not_block() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p"),
            Task::new("b", "p"),
            Task::new("c", "p"),
            Task::new("d", "p"),
        ]);
        graph
            .add_dependency("d", "a", DependencyType::StartToStart, 0)
            .unwrap();
        graph
            .add_dependency("d", "b", DependencyType::FinishToFinish, 0)
            .unwrap();
        graph
            .add_dependency("d", "c", DependencyType::StartToFinish, 0)
            .unwrap();

        assert!(!evaluate_blocked(&tasks["d"], &tasks, &graph).is_blocked);
    }

    #[test]
    fn test_cancelled_fs_predecessor_still_blocks() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_status(TaskStatus::Cancelled),
            Task::new("b", "p"),
        ]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        assert!(evaluate_blocked(&tasks["b"], &tasks, &graph).is_blocked);
    }

    #[test]
    fn test_group_dependency_blocks() {
        let (mut tasks, graph) = setup(vec![
            Task::new("design1", "p").with_group("design"),
            Task::new("design2", "p")
                .with_group("design")
                .with_status(TaskStatus::Completed),
            Task::new("build", "p").with_group_dependency("design"),
        ]);

        let state = evaluate_blocked(&tasks["build"], &tasks, &graph);
        assert!(state.is_blocked);
        assert!(state.blocked_by_group);
        assert_eq!(state.blocking, vec!["design1".to_string()]);

        tasks.get_mut("design1").unwrap().status = TaskStatus::Cancelled;
        let state = evaluate_blocked(&tasks["build"], &tasks, &graph);
        assert!(!state.is_blocked);
        assert!(!state.blocked_by_group);
    }

    #[test]
    fn test_group_ignores_other_projects() {
        let (tasks, graph) = setup(vec![
            Task::new("other", "q").with_group("design"),
            Task::new("build", "p").with_group_dependency("design"),
        ]);
        assert!(!evaluate_blocked(&tasks["build"], &tasks, &graph).is_blocked);
    }

    #[test]
    fn test_dependents_for_reevaluation() {
        let (tasks, mut graph) = setup(vec![
            Task::new("a", "p").with_group("g"),
            Task::new("b", "p"),
            Task::new("c", "p").with_group_dependency("g"),
            Task::new("d", "p"),
        ]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("c", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("d", "a", DependencyType::StartToStart, 0)
            .unwrap();

        let affected = dependents_for_reevaluation("a", &tasks, &graph);
        assert_eq!(affected, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_group_status_counts() {
        let (tasks, graph) = setup(vec![
            Task::new("x", "p").with_group("g"),
            Task::new("y", "p")
                .with_group("g")
                .with_status(TaskStatus::Completed),
            Task::new("z", "p")
                .with_group("g")
                .with_status(TaskStatus::Cancelled),
        ]);
        let status = group_status("g", "p", &tasks, &graph);
        assert_eq!(status.total, 3);
        assert_eq!(status.completed, 2);
        assert_eq!(status.incomplete, 1);
        assert!(!status.is_complete);

        let empty = group_status("none", "p", &tasks, &graph);
        assert_eq!(empty.total, 0);
        assert!(empty.is_complete);
    }
}
