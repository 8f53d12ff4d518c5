use std::collections::{HashMap, HashSet};

use crate::stage_manager::error::StageSystemError;

/// Dependency graph over stage ids.
///
/// Nodes keep their declaration order, which makes every ordering this type
/// produces deterministic.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Nodes in declaration order
    nodes: Vec<String>,
    /// Edges in the graph (stage_id -> dependencies)
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; returns `false` if it was already present
    pub fn add_node(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.nodes.push(id.to_string());
        true
    }

    /// Add an edge to the graph (stage_id depends on dependency)
    pub fn add_dependency(&mut self, stage_id: &str, dependency: &str) {
        let deps = self.edges.entry(stage_id.to_string()).or_default();
        if !deps.iter().any(|d| d == dependency) {
            deps.push(dependency.to_string());
        }
    }

    /// Check if the graph contains a node
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|n| n == node_id)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Get the dependencies of a node
    pub fn dependencies_of(&self, node_id: &str) -> &[String] {
        self.edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of a node, in declaration order
    pub fn dependents_of(&self, node_id: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| self.dependencies_of(n).iter().any(|d| d == node_id))
            .map(String::as_str)
            .collect()
    }

    /// Whether `node_id` reaches `ancestor` through one or more edges
    pub fn depends_on_transitively(&self, node_id: &str, ancestor: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.dependencies_of(node_id).iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.dependencies_of(current).iter().map(String::as_str));
            }
        }
        false
    }

    /// Nodes without dependencies
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| self.dependencies_of(n).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Check for self-edges, edges to undeclared nodes and cycles
    pub fn validate(&self) -> Result<(), StageSystemError> {
        for node in &self.nodes {
            for dep in self.dependencies_of(node) {
                if dep == node {
                    return Err(StageSystemError::SelfDependency { stage_id: node.clone() });
                }
                if !self.contains(dep) {
                    return Err(StageSystemError::UnknownDependency {
                        stage_id: node.clone(),
                        dependency_id: dep.clone(),
                    });
                }
            }
        }
        if let Some(cycle_path) = self.find_cycle() {
            return Err(StageSystemError::DependencyCycleDetected { cycle_path });
        }
        Ok(())
    }

    /// Check if the graph contains cycles
    pub fn has_cycles(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Path of the first cycle found, closed with its starting node
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node.as_str()) {
                if let Some(cycle) = self.cycle_dfs(node, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// DFS to check for cycles
    fn cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        stack.push(node);

        for dep in self.dependencies_of(node) {
            if let Some(pos) = stack.iter().position(|s| *s == dep.as_str()) {
                let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = self.cycle_dfs(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }

    /// Nodes grouped by dependency depth: every node appears in a later wave
    /// than all of its dependencies. Within a wave, declaration order.
    pub fn waves(&self) -> Result<Vec<Vec<String>>, StageSystemError> {
        self.validate()?;

        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut remaining: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|node| {
                let deps = self.dependencies_of(node);
                if deps.iter().all(|d| depth.contains_key(d.as_str())) {
                    let level = deps.iter().map(|d| depth[d.as_str()] + 1).max().unwrap_or(0);
                    depth.insert(*node, level);
                    false
                } else {
                    true
                }
            });
            if remaining.len() == before {
                return Err(StageSystemError::InternalError(
                    "unresolvable dependencies in validated graph".to_string(),
                ));
            }
        }

        let levels = depth.values().copied().max().map_or(0, |max| max + 1);
        let mut waves = vec![Vec::new(); levels];
        for node in &self.nodes {
            waves[depth[node.as_str()]].push(node.clone());
        }
        Ok(waves)
    }

    /// Get a topologically sorted list of nodes
    pub fn topological_sort(&self) -> Result<Vec<String>, StageSystemError> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }
}
