//! Dependency graph for planning.
//!
//! `DependencyGraph` records which tasks must finish before others and
//! produces a priority-aware topological order. Unlike a strict DAG it
//! accepts cycles: import graphs in real change sets can be circular, and
//! ordering must still terminate. When a cycle blocks progress the lowest
//! ranked task is forced through and reported.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Result of a priority-aware topological sort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologicalOrder {
    /// Every task exactly once.
    pub order: Vec<TaskId>,
    /// Tasks that were placed before all of their dependencies because a
    /// cycle left nothing else schedulable.
    pub forced: Vec<TaskId>,
}

/// Directed graph of task dependencies.
///
/// An edge `a -> b` means `a` must complete before `b` can start.
/// Node insertion order is the discovery order used for tie-breaking.
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a task node. Adding an existing id returns the existing node.
    pub fn add_task(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&node) = self.index.get(&id) {
            return node;
        }
        let node = self.graph.add_node(id.clone());
        self.index.insert(id, node);
        node
    }

    /// Record that `dependent` needs `dependency` to finish first.
    ///
    /// Returns `Ok(false)` for self-edges and edges that already exist.
    ///
    /// # Errors
    /// Returns an error if either task is not in the graph.
    pub fn add_dependency(&mut self, dependency: &TaskId, dependent: &TaskId) -> Result<bool> {
        let from = self.node(dependency)?;
        let to = self.node(dependent)?;
        if from == to || self.graph.find_edge(from, to).is_some() {
            return Ok(false);
        }
        self.graph.add_edge(from, to, ());
        Ok(true)
    }

    fn node(&self, id: &TaskId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::Planning(format!("Task {} not found in graph", id)))
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn has_dependency(&self, dependency: &TaskId, dependent: &TaskId) -> bool {
        match (self.index.get(dependency), self.index.get(dependent)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// Tasks that `id` depends on.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that depend on `id`.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&TaskId> {
        match self.index.get(id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, direction)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Strongly connected components with more than one member.
    pub fn cycles(&self) -> Vec<Vec<TaskId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<NodeIndex> = scc;
                members.sort();
                members
                    .into_iter()
                    .filter_map(|n| self.graph.node_weight(n).cloned())
                    .collect()
            })
            .collect()
    }

    /// Kahn's algorithm with a priority queue.
    ///
    /// Among tasks whose dependencies have all been placed, the one with
    /// the smallest `key` goes next, ties broken by discovery order. If no
    /// task is schedulable, the unplaced task with the smallest key is
    /// forced through regardless of its dependencies.
    pub fn priority_order<K, F>(&self, key: F) -> TopologicalOrder
    where
        K: Ord + Clone,
        F: Fn(&TaskId) -> K,
    {
        let count = self.graph.node_count();
        let keys: Vec<K> = self.graph.node_weights().map(&key).collect();
        let mut pending: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut placed = vec![false; count];
        let mut heap = BinaryHeap::new();
        for (i, deps) in pending.iter().enumerate() {
            if *deps == 0 {
                heap.push(Reverse((keys[i].clone(), i)));
            }
        }

        let mut result = TopologicalOrder::default();
        while result.order.len() < count {
            let next = match heap.pop() {
                Some(Reverse((_, i))) if placed[i] => continue,
                Some(Reverse((_, i))) => i,
                None => {
                    // Cycle: nothing is ready, force the most urgent task.
                    let Some(i) = (0..count)
                        .filter(|&i| !placed[i])
                        .min_by(|&a, &b| (&keys[a], a).cmp(&(&keys[b], b)))
                    else {
                        break;
                    };
                    let node = NodeIndex::new(i);
                    result.forced.push(self.graph[node].clone());
                    i
                }
            };

            placed[next] = true;
            let node = NodeIndex::new(next);
            result.order.push(self.graph[node].clone());

            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let d = dependent.index();
                pending[d] = pending[d].saturating_sub(1);
                if pending[d] == 0 && !placed[d] {
                    heap.push(Reverse((keys[d].clone(), d)));
                }
            }
        }

        result
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
