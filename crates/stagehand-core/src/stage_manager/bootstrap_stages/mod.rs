//! # Bootstrap Stage Kinds
//!
//! The concrete stages a configuration document can declare, selected by
//! the stage's `kind`, and the adapter set they run against.
pub mod cluster;
pub mod deploy_key;
pub mod known_hosts;
pub mod manifest;
pub mod repository;
pub mod seed;

use std::sync::Arc;

use crate::adapter::{
    ClusterAdmin, ClusterKeyscan, ClusterProvider, GitHost, GiteaHost, KindProvider, KnownHostsCapture, KubectlAdmin,
    LocalKeyscan,
};
use crate::kernel::error::{Error, LifecyclePhase, Result};
use crate::stage_manager::graph::StageGraph;
use crate::stage_manager::Stage;
use crate::storage::config::PodSelectorSpec;
use crate::storage::{OrchestratorConfig, StageConfig, StageSpec};

pub use cluster::ClusterStage;
pub use deploy_key::DeployKeyStage;
pub use known_hosts::{known_hosts_key, load_known_hosts, KnownHostsStage};
pub use manifest::ManifestStage;
pub use repository::RepositoryStage;
pub use seed::SeedStage;

/// External systems the bootstrap stages talk to
#[derive(Debug, Clone)]
pub struct Adapters {
    pub cluster_provider: Arc<dyn ClusterProvider>,
    pub cluster: Arc<dyn ClusterAdmin>,
    /// Absent when no stage needs a git host
    pub git_host: Option<Arc<dyn GitHost>>,
    /// Scanner for captures without `from_pod`
    pub keyscan: Arc<dyn KnownHostsCapture>,
}

impl Adapters {
    /// Real adapters: kind, kubectl, Gitea and local ssh-keyscan
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let git_host: Option<Arc<dyn GitHost>> = match &config.git_host {
            Some(git) => {
                let host = GiteaHost::new(&git.api_url, &git.ssh_url, &git.username, git.resolve_password()?)?
                    .with_git_binary(git.git_binary.clone());
                Some(Arc::new(host))
            }
            None => None,
        };
        Ok(Self {
            cluster_provider: Arc::new(KindProvider::new(config.cluster.kind_binary.clone())),
            cluster: Arc::new(KubectlAdmin::new(
                config.cluster.kubectl_binary.clone(),
                config.cluster.context.clone(),
            )),
            git_host,
            keyscan: Arc::new(LocalKeyscan::new(config.cluster.keyscan_binary.clone())),
        })
    }

    /// In-cluster scanner for `from_pod`, the local one otherwise
    pub fn keyscan_for(&self, from_pod: Option<&PodSelectorSpec>) -> Arc<dyn KnownHostsCapture> {
        match from_pod {
            Some(pod) => Arc::new(ClusterKeyscan::new(self.cluster.clone(), &pod.namespace, &pod.selector)),
            None => self.keyscan.clone(),
        }
    }

    fn require_git_host(&self, stage: &StageConfig) -> Result<Arc<dyn GitHost>> {
        self.git_host.clone().ok_or_else(|| {
            Error::lifecycle(
                LifecyclePhase::Wire,
                format!("stage '{}' ({}) needs a git host adapter", stage.id, stage.spec.kind()),
            )
        })
    }

    /// Instantiate the stage declared by `stage`
    pub fn build_stage(&self, stage: &StageConfig, config: &OrchestratorConfig) -> Result<Arc<dyn Stage>> {
        let id = stage.id.as_str();
        let built: Arc<dyn Stage> = match &stage.spec {
            StageSpec::Cluster {
                name,
                config: cluster_config,
            } => Arc::new(ClusterStage::new(
                id,
                name,
                cluster_config.clone(),
                self.cluster_provider.clone(),
            )),
            StageSpec::Manifest { manifests, rollouts } => Arc::new(ManifestStage::new(
                id,
                manifests.clone(),
                rollouts.clone(),
                self.cluster.clone(),
            )),
            StageSpec::Rollout { rollouts } => {
                Arc::new(ManifestStage::rollout(id, rollouts.clone(), self.cluster.clone()))
            }
            StageSpec::Repository { repository } => Arc::new(RepositoryStage::new(
                id,
                repository.clone(),
                self.require_git_host(stage)?,
            )),
            StageSpec::DeployKey(spec) => Arc::new(DeployKeyStage::new(
                id,
                spec.clone(),
                self.require_git_host(stage)?,
                self.cluster.clone(),
            )),
            StageSpec::KnownHosts(spec) => Arc::new(KnownHostsStage::new(
                id,
                spec.clone(),
                self.keyscan_for(spec.from_pod.as_ref()),
                self.cluster.clone(),
            )),
            StageSpec::Seed(spec) => Arc::new(SeedStage::new(
                id,
                spec.clone(),
                self.require_git_host(stage)?,
                config.vars.clone(),
            )),
        };
        Ok(built)
    }
}

/// Declare every configured stage, with its retry policy, in a validated graph
pub fn build_graph(config: &OrchestratorConfig, adapters: &Adapters) -> Result<StageGraph> {
    let defaults = config.default_policy();
    let mut graph = StageGraph::with_default_policy(defaults);
    for stage in &config.stages {
        let built = adapters.build_stage(stage, config)?;
        let depends_on: Vec<&str> = stage.depends_on.iter().map(String::as_str).collect();
        graph.add_stage_with_policy(built, &depends_on, stage.policy(&defaults))?;
    }
    graph.validate()?;
    log::debug!("Declared {} stage(s)", graph.len());
    Ok(graph)
}
