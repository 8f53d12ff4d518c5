use std::io::Write;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::process::Invocation;
use crate::adapter::ClusterProvider;

const SYSTEM: &str = "kind";

/// Cluster provider backed by the `kind` CLI
#[derive(Debug, Clone)]
pub struct KindProvider {
    binary: String,
}

impl KindProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for KindProvider {
    fn default() -> Self {
        Self::new("kind")
    }
}

#[async_trait]
impl ClusterProvider for KindProvider {
    async fn cluster_exists(&self, name: &str) -> AdapterResult<bool> {
        let output = Invocation::new(SYSTEM, &self.binary)
            .args(["get", "clusters"])
            .checked("get clusters")
            .await?;
        Ok(output.stdout_str().lines().any(|line| line.trim() == name))
    }

    async fn create_cluster(&self, name: &str, config: Option<&[u8]>) -> AdapterResult<()> {
        // kind only reads its config from a path
        let config_file = match config {
            Some(bytes) => {
                let mut file = NamedTempFile::new().map_err(|e| {
                    AdapterError::fatal(SYSTEM, format!("failed to stage cluster config: {}", e))
                })?;
                file.write_all(bytes).map_err(|e| {
                    AdapterError::fatal(SYSTEM, format!("failed to stage cluster config: {}", e))
                })?;
                Some(file)
            }
            None => None,
        };

        let mut invocation = Invocation::new(SYSTEM, &self.binary)
            .args(["create", "cluster", "--name", name, "--wait", "0s"]);
        if let Some(file) = &config_file {
            invocation = invocation.arg("--config").arg(file.path());
        }
        invocation.checked("create cluster").await?;
        log::info!("kind: created cluster '{}'", name);
        Ok(())
    }
}
