use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::error::AdapterResult;
use crate::adapter::{ClusterAdmin, WorkloadRef};
use crate::kernel::error::{Error, Result};
use crate::stage_manager::{Stage, StageContext, StageOutcome};

/// Applies manifests, then waits for workload rollouts.
///
/// With no manifests it only waits.
#[derive(Debug)]
pub struct ManifestStage {
    id: String,
    manifests: Vec<PathBuf>,
    rollouts: Vec<WorkloadRef>,
    cluster: Arc<dyn ClusterAdmin>,
}

impl ManifestStage {
    pub fn new(id: &str, manifests: Vec<PathBuf>, rollouts: Vec<WorkloadRef>, cluster: Arc<dyn ClusterAdmin>) -> Self {
        Self {
            id: id.to_string(),
            manifests,
            rollouts,
            cluster,
        }
    }

    /// A stage that only waits for rollouts
    pub fn rollout(id: &str, rollouts: Vec<WorkloadRef>, cluster: Arc<dyn ClusterAdmin>) -> Self {
        Self::new(id, Vec::new(), rollouts, cluster)
    }
}

#[async_trait]
impl Stage for ManifestStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        if self.manifests.is_empty() {
            "Waits for workload rollouts."
        } else {
            "Applies cluster manifests and waits for their rollouts."
        }
    }

    async fn execute(&self, context: &StageContext) -> Result<StageOutcome> {
        if self.manifests.is_empty() {
            return Ok(StageOutcome::Waited);
        }
        for path in &self.manifests {
            let manifest = tokio::fs::read(path)
                .await
                .map_err(|e| Error::io(e, "read manifest", path.clone()))?;
            let cluster = self.cluster.as_ref();
            let manifest = manifest.as_slice();
            context
                .poller()
                .retry(&format!("apply {}", path.display()), move || cluster.apply(manifest))
                .await?;
            log::info!("Applied {}", path.display());
        }
        Ok(StageOutcome::Applied)
    }

    async fn is_converged(&self, _context: &StageContext) -> AdapterResult<bool> {
        for workload in &self.rollouts {
            if !self.cluster.rollout_status(workload).await? {
                log::debug!("{} not rolled out yet", workload);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn dry_run_description(&self) -> String {
        let waits = self
            .rollouts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match (self.manifests.is_empty(), waits.is_empty()) {
            (true, true) => "Nothing to apply or wait for".to_string(),
            (true, false) => format!("Wait for rollout of {}", waits),
            (false, true) => format!("Apply {} manifest(s)", self.manifests.len()),
            (false, false) => format!("Apply {} manifest(s), then wait for {}", self.manifests.len(), waits),
        }
    }
}
