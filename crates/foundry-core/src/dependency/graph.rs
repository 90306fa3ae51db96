//! Directed graph of generation tasks
//!
//! Edges point from the task that must be generated first to the task that
//! depends on it. Unlike a goal DAG, edges are accepted unconditionally while
//! the graph is being built; cycles are surfaced by [`TaskDependencyGraph::topological_sort`]
//! so the caller sees every task involved instead of the first offending edge.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::error::{GraphError, Result};

/// Fixed generation layers, in generation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLayer {
    Entity,
    Mapper,
    Service,
    Controller,
}

impl TaskLayer {
    pub const ALL: [TaskLayer; 4] = [
        TaskLayer::Entity,
        TaskLayer::Mapper,
        TaskLayer::Service,
        TaskLayer::Controller,
    ];

    pub fn priority(self) -> u32 {
        match self {
            TaskLayer::Entity => 10,
            TaskLayer::Mapper => 20,
            TaskLayer::Service => 30,
            TaskLayer::Controller => 40,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskLayer::Entity => "entity",
            TaskLayer::Mapper => "mapper",
            TaskLayer::Service => "service",
            TaskLayer::Controller => "controller",
        }
    }

    /// Class name suffix appended to the table's PascalCase stem
    pub fn class_suffix(self) -> &'static str {
        match self {
            TaskLayer::Entity => "Entity",
            TaskLayer::Mapper => "Mapper",
            TaskLayer::Service => "Service",
            TaskLayer::Controller => "Controller",
        }
    }
}

impl fmt::Display for TaskLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of generation work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    /// Stable id, `task_<layer>_<table>`
    pub id: String,
    pub layer: TaskLayer,
    pub table: String,
    /// e.g. `OrderItemsService`
    pub class_name: String,
    /// Position of the owning table in schema discovery order
    pub table_index: usize,
}

impl TaskNode {
    pub fn id_for(layer: TaskLayer, table: &str) -> String {
        format!("task_{}_{}", layer.as_str(), table)
    }

    pub fn priority(&self) -> u32 {
        self.layer.priority()
    }

    fn sort_key(&self) -> (u32, usize) {
        (self.priority(), self.table_index)
    }
}

/// Task graph for one planning pass
#[derive(Debug, Clone, Default)]
pub struct TaskDependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
    nodes: HashMap<String, TaskNode>,
}

impl TaskDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Returns `false` if a task with the same id already exists.
    pub fn add_node(&mut self, node: TaskNode) -> bool {
        if self.node_map.contains_key(&node.id) {
            return false;
        }
        let idx = self.graph.add_node(node.id.clone());
        self.node_map.insert(node.id.clone(), idx);
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Record that `before` must be generated before `after`.
    ///
    /// Duplicate edges are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if either task is unknown.
    pub fn add_dependency(&mut self, before: &str, after: &str) -> Result<()> {
        let from = *self
            .node_map
            .get(before)
            .ok_or_else(|| GraphError::NodeNotFound(before.to_string()))?;
        let to = *self
            .node_map
            .get(after)
            .ok_or_else(|| GraphError::NodeNotFound(after.to_string()))?;

        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    pub fn get(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// All tasks, in deterministic (layer, table order) order
    pub fn nodes(&self) -> Vec<&TaskNode> {
        let mut nodes: Vec<&TaskNode> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.sort_key());
        nodes
    }

    pub fn has_edge(&self, before: &str, after: &str) -> bool {
        match (self.node_map.get(before), self.node_map.get(after)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// Tasks that must be generated before `id`
    pub fn dependencies_of(&self, id: &str) -> Result<Vec<&TaskNode>> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks waiting on `id`
    pub fn dependents_of(&self, id: &str) -> Result<Vec<&TaskNode>> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Result<Vec<&TaskNode>> {
        let idx = self
            .node_map
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        let mut out: Vec<&TaskNode> = self
            .graph
            .neighbors_directed(*idx, direction)
            .filter_map(|n| self.nodes.get(&self.graph[n]))
            .collect();
        out.sort_by_key(|n| n.sort_key());
        Ok(out)
    }

    /// Ids of every task that sits on a cycle, sorted, or `None` when acyclic
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut members: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&n| self.graph.find_edge(n, n).is_some())
            })
            .flatten()
            .map(|n| self.graph[n].clone())
            .collect();

        if members.is_empty() {
            None
        } else {
            members.sort();
            Some(members)
        }
    }

    /// Deterministic topological order.
    ///
    /// Among tasks whose dependencies are all satisfied, the one with the
    /// lowest layer priority goes first, then the one whose table was
    /// discovered first.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] listing every task on a cycle.
    pub fn topological_sort(&self) -> Result<Vec<TaskNode>> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(GraphError::CycleDetected(cycle).into());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let degree = self.graph.neighbors_directed(n, Direction::Incoming).count();
                (n, degree)
            })
            .collect();

        let key = |n: NodeIndex| -> (u32, usize, NodeIndex) {
            let (priority, table_index) = self
                .nodes
                .get(&self.graph[n])
                .map(TaskNode::sort_key)
                .unwrap_or((u32::MAX, usize::MAX));
            (priority, table_index, n)
        };

        let mut ready: BinaryHeap<Reverse<(u32, usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&n, _)| Reverse(key(n)))
            .collect();

        let mut sorted = Vec::with_capacity(self.node_count());
        while let Some(Reverse((_, _, idx))) = ready.pop() {
            if let Some(node) = self.nodes.get(&self.graph[idx]) {
                sorted.push(node.clone());
            }
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(d) = in_degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(key(next)));
                    }
                }
            }
        }

        Ok(sorted)
    }
}
