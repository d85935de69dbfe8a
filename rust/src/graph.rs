//! Dependency graph over task ids.
//!
//! Tasks are nodes in an arena addressed by [`NodeIndex`]. Each edge is stored
//! once, keyed by its [`DependencyId`], and referenced from the adjacency lists
//! of both endpoints in creation order. The graph never reads task dates or
//! statuses; it only answers structural questions.
//!
//! Invariant: the edges `depends_on_task_id -> task_id` form a DAG. Every
//! mutation that could break this is checked before it is committed.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

use crate::models::{Dependency, DependencyId, DependencyType, MAX_LAG_DAYS};

/// Arena slot of a task.
pub type NodeIndex = u32;

/// Errors from dependency mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task cannot depend on itself: {0}")]
    SelfReference(String),
    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("Dependency not found: {0}")]
    DependencyNotFound(DependencyId),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Dependency already exists: {task_id} depends on {depends_on_task_id}")]
    DuplicateDependency {
        task_id: String,
        depends_on_task_id: String,
    },
    #[error("Lag of {0} days is outside -36500..=36500")]
    LagOutOfRange(i64),
    #[error("No dependency ids left")]
    IdsExhausted,
}

fn check_lag(lag_days: i64) -> Result<(), GraphError> {
    if (-MAX_LAG_DAYS..=MAX_LAG_DAYS).contains(&lag_days) {
        Ok(())
    } else {
        Err(GraphError::LagOutOfRange(lag_days))
    }
}

#[derive(Clone, Debug)]
struct Node {
    id: String,
    /// Edges where this task is the successor.
    incoming: Vec<DependencyId>,
    /// Edges where this task is the predecessor.
    outgoing: Vec<DependencyId>,
}

#[derive(Clone, Debug)]
struct Edge {
    dependency: Dependency,
    from: NodeIndex,
    to: NodeIndex,
}

/// Arena-backed dependency graph.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    index: FxHashMap<String, NodeIndex>,
    nodes: Vec<Option<Node>>,
    edges: BTreeMap<DependencyId, Edge>,
    next_id: DependencyId,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task node. Idempotent.
    pub fn add_task(&mut self, task_id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(task_id) {
            return idx;
        }
        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Some(Node {
            id: task_id.to_string(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }));
        self.index.insert(task_id.to_string(), idx);
        idx
    }

    /// Remove a task and every edge touching it. Returns the removed edges.
    pub fn remove_task(&mut self, task_id: &str) -> Result<Vec<Dependency>, GraphError> {
        let idx = self
            .index
            .remove(task_id)
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;
        let node = self.nodes[idx as usize]
            .take()
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;

        let mut edge_ids: Vec<DependencyId> =
            node.incoming.iter().chain(&node.outgoing).copied().collect();
        edge_ids.sort_unstable();
        edge_ids.dedup();

        let mut removed = Vec::with_capacity(edge_ids.len());
        for id in edge_ids {
            if let Some(edge) = self.edges.remove(&id) {
                self.unlink(&edge, id);
                removed.push(edge.dependency);
            }
        }
        Ok(removed)
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// Task ids in registration order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().flatten().map(|n| n.id.as_str())
    }

    pub fn task_count(&self) -> usize {
        self.index.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.edges.len()
    }

    /// All dependencies in creation order.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.edges.values().map(|e| &e.dependency)
    }

    pub fn dependency(&self, id: DependencyId) -> Option<&Dependency> {
        self.edges.get(&id).map(|e| &e.dependency)
    }

    /// Add an edge `depends_on -> task_id`, allocating a new id.
    pub fn add_dependency(
        &mut self,
        task_id: &str,
        depends_on: &str,
        dependency_type: DependencyType,
        lag_days: i64,
    ) -> Result<DependencyId, GraphError> {
        let id = self.next_id;
        if self.edges.contains_key(&id) {
            return Err(GraphError::IdsExhausted);
        }
        self.insert_dependency(Dependency {
            id,
            task_id: task_id.to_string(),
            depends_on_task_id: depends_on.to_string(),
            dependency_type,
            lag_days,
        })
    }

    /// Add an edge that already carries an id (loading from the host store).
    ///
    /// The graph is left unchanged when the edge is rejected.
    pub fn insert_dependency(&mut self, dependency: Dependency) -> Result<DependencyId, GraphError> {
        if dependency.task_id == dependency.depends_on_task_id {
            return Err(GraphError::SelfReference(dependency.task_id));
        }
        check_lag(dependency.lag_days)?;
        let to = self.node_index(&dependency.task_id)?;
        let from = self.node_index(&dependency.depends_on_task_id)?;

        if self.edge_between(from, to).is_some() {
            return Err(GraphError::DuplicateDependency {
                task_id: dependency.task_id,
                depends_on_task_id: dependency.depends_on_task_id,
            });
        }
        if self.edges.contains_key(&dependency.id) {
            return Err(GraphError::DuplicateDependency {
                task_id: dependency.task_id,
                depends_on_task_id: dependency.depends_on_task_id,
            });
        }

        // The new edge closes a cycle iff the successor already reaches the predecessor.
        if let Some(path) = self.find_path(to, from) {
            let mut ids = self.resolve_path(&path);
            ids.push(dependency.task_id.clone());
            return Err(GraphError::Cycle { path: ids });
        }

        let id = dependency.id;
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.link(from, to, id);
        self.edges.insert(
            id,
            Edge {
                dependency,
                from,
                to,
            },
        );
        Ok(id)
    }

    pub fn remove_dependency(&mut self, id: DependencyId) -> Result<Dependency, GraphError> {
        let edge = self
            .edges
            .remove(&id)
            .ok_or(GraphError::DependencyNotFound(id))?;
        self.unlink(&edge, id);
        Ok(edge.dependency)
    }

    /// Change type and/or lag of an edge. Returns the edge as it was before.
    ///
    /// Neither field affects reachability, so no cycle check is needed.
    pub fn update_dependency(
        &mut self,
        id: DependencyId,
        dependency_type: Option<DependencyType>,
        lag_days: Option<i64>,
    ) -> Result<Dependency, GraphError> {
        if let Some(lag_days) = lag_days {
            check_lag(lag_days)?;
        }
        let edge = self
            .edges
            .get_mut(&id)
            .ok_or(GraphError::DependencyNotFound(id))?;
        let previous = edge.dependency.clone();
        if let Some(dependency_type) = dependency_type {
            edge.dependency.dependency_type = dependency_type;
        }
        if let Some(lag_days) = lag_days {
            edge.dependency.lag_days = lag_days;
        }
        Ok(previous)
    }

    /// Edges where `task_id` is the successor, in creation order.
    pub fn predecessors_of(
        &self,
        task_id: &str,
        dependency_type: Option<DependencyType>,
    ) -> Vec<&Dependency> {
        self.adjacent(task_id, dependency_type, |n| &n.incoming)
    }

    /// Edges where `task_id` is the predecessor, in creation order.
    pub fn successors_of(
        &self,
        task_id: &str,
        dependency_type: Option<DependencyType>,
    ) -> Vec<&Dependency> {
        self.adjacent(task_id, dependency_type, |n| &n.outgoing)
    }

    /// Report the cycle that `task_id depends on depends_on` would create,
    /// without mutating the graph.
    pub fn find_cycle(&self, task_id: &str, depends_on: &str) -> Option<Vec<String>> {
        if task_id == depends_on {
            return Some(vec![task_id.to_string(), depends_on.to_string()]);
        }
        let to = *self.index.get(task_id)?;
        let from = *self.index.get(depends_on)?;
        self.find_path(to, from).map(|path| {
            let mut ids = self.resolve_path(&path);
            ids.push(task_id.to_string());
            ids
        })
    }

    /// True if `to` is reachable from `from` by following successor edges.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.find_path(a, b).is_some(),
            _ => false,
        }
    }

    /// Topological order (predecessors first) of all tasks, considering only
    /// edges accepted by `keep`.
    ///
    /// Uses Kahn's algorithm seeded in registration order and walking
    /// successors in creation order, so the result is deterministic.
    pub fn topological_order<F>(&self, keep: F) -> Result<Vec<&str>, GraphError>
    where
        F: Fn(&Dependency) -> bool,
    {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        for edge in self.edges.values() {
            if keep(&edge.dependency) {
                in_degree[edge.to as usize] += 1;
            }
        }

        let mut queue: VecDeque<NodeIndex> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| n.is_some() && in_degree[*i] == 0)
            .map(|(i, _)| i as NodeIndex)
            .collect();

        let mut order: Vec<&str> = Vec::with_capacity(self.index.len());
        while let Some(idx) = queue.pop_front() {
            let Some(node) = self.nodes[idx as usize].as_ref() else {
                continue;
            };
            order.push(node.id.as_str());
            for id in &node.outgoing {
                let Some(edge) = self.edges.get(id) else {
                    continue;
                };
                if !keep(&edge.dependency) {
                    continue;
                }
                let degree = &mut in_degree[edge.to as usize];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(edge.to);
                }
            }
        }

        if order.len() != self.index.len() {
            let placed: FxHashSet<&str> = order.iter().copied().collect();
            let path = self
                .task_ids()
                .filter(|id| !placed.contains(id))
                .map(str::to_string)
                .collect();
            return Err(GraphError::Cycle { path });
        }
        Ok(order)
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order(|_| true).is_ok()
    }

    fn node_index(&self, task_id: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(task_id)
            .copied()
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))
    }

    fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.nodes.get(idx as usize).and_then(|n| n.as_ref())
    }

    fn adjacent<F>(
        &self,
        task_id: &str,
        dependency_type: Option<DependencyType>,
        side: F,
    ) -> Vec<&Dependency>
    where
        F: Fn(&Node) -> &Vec<DependencyId>,
    {
        let Some(node) = self.index.get(task_id).and_then(|&i| self.node(i)) else {
            return Vec::new();
        };
        side(node)
            .iter()
            .filter_map(|id| self.edges.get(id))
            .map(|e| &e.dependency)
            .filter(|d| dependency_type.map_or(true, |t| d.dependency_type == t))
            .collect()
    }

    fn edge_between(&self, from: NodeIndex, to: NodeIndex) -> Option<DependencyId> {
        let node = self.node(from)?;
        node.outgoing
            .iter()
            .copied()
            .find(|id| self.edges.get(id).is_some_and(|e| e.to == to))
    }

    /// Depth-first search along successor edges. Returns the node path
    /// `from ..= to` if one exists.
    fn find_path(&self, from: NodeIndex, to: NodeIndex) -> Option<Vec<NodeIndex>> {
        let mut parent: FxHashMap<NodeIndex, NodeIndex> = FxHashMap::default();
        let mut visited: FxHashSet<NodeIndex> = FxHashSet::default();
        let mut stack = vec![from];
        visited.insert(from);

        while let Some(current) = stack.pop() {
            if current == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            let Some(node) = self.node(current) else {
                continue;
            };
            for id in &node.outgoing {
                if let Some(edge) = self.edges.get(id) {
                    if visited.insert(edge.to) {
                        parent.insert(edge.to, current);
                        stack.push(edge.to);
                    }
                }
            }
        }
        None
    }

    fn resolve_path(&self, path: &[NodeIndex]) -> Vec<String> {
        path.iter()
            .filter_map(|&i| self.node(i))
            .map(|n| n.id.clone())
            .collect()
    }

    fn link(&mut self, from: NodeIndex, to: NodeIndex, id: DependencyId) {
        if let Some(node) = self.nodes[from as usize].as_mut() {
            insert_sorted(&mut node.outgoing, id);
        }
        if let Some(node) = self.nodes[to as usize].as_mut() {
            insert_sorted(&mut node.incoming, id);
        }
    }

    fn unlink(&mut self, edge: &Edge, id: DependencyId) {
        if let Some(node) = self.nodes[edge.from as usize].as_mut() {
            node.outgoing.retain(|&e| e != id);
        }
        if let Some(node) = self.nodes[edge.to as usize].as_mut() {
            node.incoming.retain(|&e| e != id);
        }
    }
}

/// Keep adjacency lists in creation (id) order even when the host loads edges
/// out of order.
fn insert_sorted(ids: &mut Vec<DependencyId>, id: DependencyId) {
    let pos = ids.partition_point(|&e| e < id);
    ids.insert(pos, id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(tasks: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for t in tasks {
            graph.add_task(t);
        }
        graph
    }

    #[test]
    fn test_add_and_query_dependency() {
        let mut graph = graph_with(&["a", "b", "c"]);
        let fs = graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 1)
            .unwrap();
        graph
            .add_dependency("c", "a", DependencyType::StartToStart, 0)
            .unwrap();

        let succs: Vec<&str> = graph
            .successors_of("a", None)
            .iter()
            .map(|d| d.task_id.as_str())
            .collect();
        assert_eq!(succs, vec!["b", "c"]);

        let fs_only = graph.successors_of("a", Some(DependencyType::FinishToStart));
        assert_eq!(fs_only.len(), 1);
        assert_eq!(fs_only[0].id, fs);
        assert_eq!(fs_only[0].lag_days, 1);

        let preds = graph.predecessors_of("b", None);
        assert_eq!(preds[0].depends_on_task_id, "a");
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut graph = graph_with(&["a"]);
        let result = graph.add_dependency("a", "a", DependencyType::FinishToStart, 0);
        assert_eq!(result, Err(GraphError::SelfReference("a".to_string())));
        assert_eq!(graph.dependency_count(), 0);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("c", "b", DependencyType::FinishToStart, 0)
            .unwrap();

        // a depends on c would close a -> b -> c -> a
        let result = graph.add_dependency("a", "c", DependencyType::FinishToStart, 0);
        assert_eq!(
            result,
            Err(GraphError::Cycle {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            })
        );
        assert_eq!(graph.dependency_count(), 2);
        assert!(graph.is_acyclic());
        assert!(graph.predecessors_of("a", None).is_empty());
    }

    #[test]
    fn test_find_cycle_does_not_mutate() {
        let mut graph = graph_with(&["a", "b"]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        assert!(graph.find_cycle("a", "b").is_some());
        assert!(graph.find_cycle("b", "a").is_none());
        assert_eq!(graph.dependency_count(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut graph = graph_with(&["a", "b"]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        let result = graph.add_dependency("b", "a", DependencyType::StartToStart, 2);
        assert!(matches!(
            result,
            Err(GraphError::DuplicateDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_task_rejected() {
        let mut graph = graph_with(&["a"]);
        let result = graph.add_dependency("a", "ghost", DependencyType::FinishToStart, 0);
        assert_eq!(result, Err(GraphError::TaskNotFound("ghost".to_string())));
    }

    #[test]
    fn test_remove_and_update_dependency() {
        let mut graph = graph_with(&["a", "b"]);
        let id = graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();

        let previous = graph
            .update_dependency(id, Some(DependencyType::FinishToFinish), Some(3))
            .unwrap();
        assert_eq!(previous.dependency_type, DependencyType::FinishToStart);
        let current = graph.dependency(id).unwrap();
        assert_eq!(current.dependency_type, DependencyType::FinishToFinish);
        assert_eq!(current.lag_days, 3);

        graph.remove_dependency(id).unwrap();
        assert!(graph.successors_of("a", None).is_empty());
        assert_eq!(
            graph.remove_dependency(id),
            Err(GraphError::DependencyNotFound(id))
        );
    }

    #[test]
    fn test_remove_task_drops_edges() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("c", "b", DependencyType::FinishToStart, 0)
            .unwrap();

        let removed = graph.remove_task("b").unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(graph.dependency_count(), 0);
        assert!(graph.successors_of("a", None).is_empty());
        assert_eq!(graph.task_ids().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let mut graph = graph_with(&["d", "c", "b", "a"]);
        graph
            .add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("c", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("d", "b", DependencyType::FinishToStart, 0)
            .unwrap();
        graph
            .add_dependency("d", "c", DependencyType::FinishToStart, 0)
            .unwrap();

        let order = graph.topological_order(|_| true).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(order, graph.topological_order(|_| true).unwrap());
    }

    #[test]
    fn test_insert_with_host_ids_keeps_creation_order() {
        let mut graph = graph_with(&["a", "b", "c"]);
        for (id, succ) in [(7, "c"), (3, "b")] {
            graph
                .insert_dependency(Dependency {
                    id,
                    task_id: succ.to_string(),
                    depends_on_task_id: "a".to_string(),
                    dependency_type: DependencyType::FinishToStart,
                    lag_days: 0,
                })
                .unwrap();
        }
        let succs: Vec<DependencyId> = graph.successors_of("a", None).iter().map(|d| d.id).collect();
        assert_eq!(succs, vec![3, 7]);

        let next = graph
            .add_dependency("c", "b", DependencyType::FinishToStart, 0)
            .unwrap();
        assert_eq!(next, 8);
    }

    #[test]
    fn test_lag_outside_bound_rejected() {
        let mut graph = graph_with(&["a", "b"]);
        let result = graph.add_dependency("b", "a", DependencyType::FinishToStart, 1_000_000_000);
        assert_eq!(result, Err(GraphError::LagOutOfRange(1_000_000_000)));
        assert_eq!(graph.dependency_count(), 0);

        let id = graph
            .add_dependency("b", "a", DependencyType::FinishToStart, -MAX_LAG_DAYS)
            .unwrap();
        assert_eq!(
            graph.update_dependency(id, None, Some(i64::MIN)),
            Err(GraphError::LagOutOfRange(i64::MIN))
        );
        assert_eq!(graph.dependency(id).unwrap().lag_days, -MAX_LAG_DAYS);
    }

    #[test]
    fn test_highest_host_id_does_not_wrap() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph
            .insert_dependency(Dependency {
                id: DependencyId::MAX,
                task_id: "b".to_string(),
                depends_on_task_id: "a".to_string(),
                dependency_type: DependencyType::FinishToStart,
                lag_days: 0,
            })
            .unwrap();
        assert_eq!(
            graph.add_dependency("c", "b", DependencyType::FinishToStart, 0),
            Err(GraphError::IdsExhausted)
        );
        assert_eq!(graph.dependency_count(), 1);
    }
}
