use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::error::AdapterResult;
use crate::adapter::ClusterProvider;
use crate::kernel::error::{Error, Result};
use crate::stage_manager::{Stage, StageContext, StageOutcome};
use crate::step::{ExternalResourceRef, IdempotentStep, Resource};

struct ClusterResource<'a> {
    provider: &'a dyn ClusterProvider,
    name: &'a str,
    config: Option<&'a [u8]>,
}

#[async_trait]
impl Resource for ClusterResource<'_> {
    fn reference(&self) -> ExternalResourceRef {
        ExternalResourceRef::new("cluster", self.name)
    }

    async fn exists(&self) -> AdapterResult<bool> {
        self.provider.cluster_exists(self.name).await
    }

    async fn create(&self) -> AdapterResult<()> {
        self.provider.create_cluster(self.name, self.config).await
    }
}

/// Creates the local cluster unless it exists
#[derive(Debug)]
pub struct ClusterStage {
    id: String,
    cluster_name: String,
    config: Option<PathBuf>,
    provider: Arc<dyn ClusterProvider>,
}

impl ClusterStage {
    pub fn new(id: &str, cluster_name: &str, config: Option<PathBuf>, provider: Arc<dyn ClusterProvider>) -> Self {
        Self {
            id: id.to_string(),
            cluster_name: cluster_name.to_string(),
            config,
            provider,
        }
    }
}

#[async_trait]
impl Stage for ClusterStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Creates the local Kubernetes cluster."
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutcome> {
        let config = match &self.config {
            Some(path) => Some(
                tokio::fs::read(path)
                    .await
                    .map_err(|e| Error::io(e, "read cluster config", path.clone()))?,
            ),
            None => None,
        };
        let step = IdempotentStep::new(ClusterResource {
            provider: self.provider.as_ref(),
            name: &self.cluster_name,
            config: config.as_deref(),
        });
        Ok(step.ensure(context.poller()).await?.into())
    }

    async fn is_converged(&self, _context: &StageContext) -> AdapterResult<bool> {
        self.provider.cluster_exists(&self.cluster_name).await
    }

    fn dry_run_description(&self) -> String {
        match &self.config {
            Some(path) => format!(
                "Create cluster '{}' from {} unless it exists",
                self.cluster_name,
                path.display()
            ),
            None => format!("Create cluster '{}' unless it exists", self.cluster_name),
        }
    }
}
