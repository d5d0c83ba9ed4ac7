//! Dependency graph (DAG) construction and traversal
//!
//! Builds forward and reverse dependency graphs from the registry, orders
//! units for execution and answers impact queries.

use std::collections::{HashMap, HashSet, VecDeque};
use martflow_core::Unit;
use crate::registry::UnitRegistry;

/// Node identifier (unit name)
pub type NodeId = String;

/// Graph errors (structural, raised before anything executes)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Unit '{referenced_by}' depends on unknown unit '{name}'")]
    UnknownUnit { name: String, referenced_by: String },

    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    CycleDetected { cycle: Vec<NodeId> },
}

fn format_cycle(cycle: &[NodeId]) -> String {
    let mut path = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Dependency graph with forward and reverse edges
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Forward edges: node -> list of nodes it depends on (parents)
    parents: HashMap<NodeId, Vec<NodeId>>,

    /// Reverse edges: node -> list of nodes that depend on it (children)
    children: HashMap<NodeId, Vec<NodeId>>,

    /// All nodes in registration order
    nodes: Vec<NodeId>,
}

impl DependencyGraph {
    /// Build a dependency graph from the registry
    ///
    /// Every `depends_on` entry must name a registered unit.
    pub fn build(registry: &UnitRegistry) -> Result<Self, GraphError> {
        let mut parents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut nodes = Vec::with_capacity(registry.len());

        for unit in registry.all() {
            nodes.push(unit.name.clone());

            let mut deps: Vec<NodeId> = Vec::with_capacity(unit.depends_on.len());
            for dep in &unit.depends_on {
                if !registry.contains(dep) {
                    return Err(GraphError::UnknownUnit {
                        name: dep.clone(),
                        referenced_by: unit.name.clone(),
                    });
                }
                if deps.contains(dep) {
                    continue;
                }
                deps.push(dep.clone());

                // Build reverse edges
                children
                    .entry(dep.clone())
                    .or_insert_with(Vec::new)
                    .push(unit.name.clone());
            }

            parents.insert(unit.name.clone(), deps);
        }

        Ok(Self {
            parents,
            children,
            nodes,
        })
    }

    /// Get all nodes in registration order
    pub fn all_nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.parents.contains_key(node_id)
    }

    /// Get immediate parents (dependencies) of a node
    pub fn parents(&self, node_id: &str) -> Vec<&NodeId> {
        self.parents
            .get(node_id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get immediate children (dependents) of a node
    pub fn children(&self, node_id: &str) -> Vec<&NodeId> {
        self.children
            .get(node_id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get all downstream nodes (transitive closure of children)
    ///
    /// This is the "blast radius" - every unit skipped if this one fails.
    pub fn downstream(&self, node_id: &str) -> Vec<NodeId> {
        Self::bfs(node_id, &self.children)
    }

    /// Get all upstream nodes (transitive closure of parents)
    pub fn upstream(&self, node_id: &str) -> Vec<NodeId> {
        Self::bfs(node_id, &self.parents)
    }

    fn bfs(start: &str, edges: &HashMap<NodeId, Vec<NodeId>>) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        if let Some(next) = edges.get(start) {
            queue.extend(next.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(next) = edges.get(&current) {
                for node in next {
                    if !visited.contains(node) {
                        queue.push_back(node.clone());
                    }
                }
            }

            result.push(current);
        }

        result
    }

    /// Check if there's a path from source to target
    pub fn has_path(&self, source: &str, target: &str) -> bool {
        self.downstream(source).iter().any(|n| n == target)
    }

    /// Topological order of all nodes
    ///
    /// Depth-first over parents with three-colour marking. Roots are taken in
    /// registration order and parents in declaration order, so the result is
    /// deterministic. A back edge to an in-progress node is a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut marks: HashMap<&str, Mark> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), Mark::Unvisited))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        // (node, index of the next parent to visit)
        let mut stack: Vec<(&str, usize)> = Vec::new();

        for root in &self.nodes {
            if marks.get(root.as_str()) != Some(&Mark::Unvisited) {
                continue;
            }

            marks.insert(root.as_str(), Mark::InProgress);
            stack.push((root.as_str(), 0));

            while let Some((node, next)) = stack.last().copied() {
                let deps = self.parents.get(node).map(Vec::as_slice).unwrap_or(&[]);

                if let Some(parent) = deps.get(next) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }

                    match marks.get(parent.as_str()).copied().unwrap_or(Mark::Done) {
                        Mark::Unvisited => {
                            marks.insert(parent.as_str(), Mark::InProgress);
                            stack.push((parent.as_str(), 0));
                        }
                        Mark::InProgress => {
                            // Members of the cycle are the in-progress path from `parent`
                            let start = stack
                                .iter()
                                .position(|(n, _)| *n == parent.as_str())
                                .unwrap_or(0);
                            let cycle = stack[start..]
                                .iter()
                                .map(|(n, _)| n.to_string())
                                .collect();
                            return Err(GraphError::CycleDetected { cycle });
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    order.push(node.to_string());
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}

/// Build the graph and return units in execution order
pub fn build_order(registry: &UnitRegistry) -> Result<Vec<&Unit>, GraphError> {
    let graph = DependencyGraph::build(registry)?;
    let order = graph.topological_order()?;

    Ok(order
        .iter()
        .filter_map(|name| registry.get(name).ok())
        .collect())
}
