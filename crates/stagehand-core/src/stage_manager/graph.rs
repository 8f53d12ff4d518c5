use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::kernel::constants::MIN_CONCURRENCY;
use crate::poller::RetryPolicy;
use crate::stage_manager::dependency::DependencyGraph;
use crate::stage_manager::error::StageSystemError;
use crate::stage_manager::Stage;

/// A declared stage with its dependencies and retry budget
#[derive(Clone)]
pub struct StageNode {
    pub stage: Arc<dyn Stage>,
    pub depends_on: Vec<String>,
    pub policy: RetryPolicy,
}

impl fmt::Debug for StageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageNode")
            .field("id", &self.stage.id())
            .field("depends_on", &self.depends_on)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Stages declared once at startup, keyed by id, in declaration order
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    nodes: Vec<StageNode>,
    index: HashMap<String, usize>,
    dependencies: DependencyGraph,
    default_policy: RetryPolicy,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for stages added without one
    pub fn with_default_policy(policy: RetryPolicy) -> Self {
        Self {
            default_policy: policy,
            ..Self::default()
        }
    }

    pub fn add_stage(&mut self, stage: Arc<dyn Stage>, depends_on: &[&str]) -> Result<(), StageSystemError> {
        let policy = self.default_policy;
        self.add_stage_with_policy(stage, depends_on, policy)
    }

    /// Dependencies may name stages declared later; [`StageGraph::validate`]
    /// checks they all exist.
    pub fn add_stage_with_policy(
        &mut self,
        stage: Arc<dyn Stage>,
        depends_on: &[&str],
        policy: RetryPolicy,
    ) -> Result<(), StageSystemError> {
        let id = stage.id().to_string();
        if !self.dependencies.add_node(&id) {
            return Err(StageSystemError::StageAlreadyExists { stage_id: id });
        }
        for dependency in depends_on {
            self.dependencies.add_dependency(&id, dependency);
        }
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(StageNode {
            stage,
            depends_on: self.dependencies.dependencies_of(&id).to_vec(),
            policy,
        });
        Ok(())
    }

    /// Reject unknown dependencies, self-dependencies and cycles
    pub fn validate(&self) -> Result<(), StageSystemError> {
        self.dependencies.validate()
    }

    pub fn node(&self, stage_id: &str) -> Option<&StageNode> {
        self.index.get(stage_id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.stage.id())
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stage ids grouped by dependency depth
    pub fn waves(&self) -> Result<Vec<Vec<String>>, StageSystemError> {
        self.dependencies.waves()
    }

    /// Every stage that transitively depends on `stage_id`, in declaration order
    pub fn transitive_dependents(&self, stage_id: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut frontier = vec![stage_id.to_string()];
        while let Some(current) = frontier.pop() {
            for dependent in self.dependencies.dependents_of(&current) {
                if !found.iter().any(|f| f == dependent) {
                    found.push(dependent.to_string());
                    frontier.push(dependent.to_string());
                }
            }
        }
        self.dependencies
            .nodes()
            .iter()
            .filter(|node| found.contains(node))
            .cloned()
            .collect()
    }

    /// One worker per independent top-level branch
    pub fn default_concurrency(&self) -> usize {
        self.dependencies.roots().len().max(MIN_CONCURRENCY)
    }
}
