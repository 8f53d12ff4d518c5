//! # Stagehand External System Adapters
//!
//! Capability-scoped clients for every external system the orchestrator
//! touches. Each capability is a small async trait so stages depend only on
//! what they use and tests can substitute recording mocks:
//!
//! - [`ClusterProvider`]: create and look up the local cluster itself.
//! - [`ClusterAdmin`]: apply manifests, read rollout status, exec diagnostics.
//! - [`GitHost`]: repositories, deploy keys, repository secrets, pushes.
//! - [`KnownHostsCapture`]: SSH host key scans.
//!
//! All methods return [`AdapterResult`], classifying failures as transient,
//! conflict or fatal (see [`error`]).
pub mod error;
pub mod gitea;
pub mod keyscan;
pub mod kind;
pub mod kubectl;
pub mod process;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::KeyMaterial;

pub use error::{AdapterError, AdapterResult, ErrorClass};
pub use gitea::GiteaHost;
pub use keyscan::{ClusterKeyscan, LocalKeyscan};
pub use kind::KindProvider;
pub use kubectl::KubectlAdmin;

/// A workload whose rollout can be awaited, written `kind/namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkloadRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for WorkloadRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [kind, namespace, name] if !kind.is_empty() && !namespace.is_empty() && !name.is_empty() => {
                Ok(WorkloadRef::new(kind, namespace, name))
            }
            _ => Err(format!(
                "invalid workload reference '{}': expected kind/namespace/name",
                s
            )),
        }
    }
}

impl TryFrom<String> for WorkloadRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkloadRef> for String {
    fn from(value: WorkloadRef) -> Self {
        value.to_string()
    }
}

/// A repository on the git host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A public key registered on a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployKey {
    pub title: String,
    /// OpenSSH public key line as returned by the host
    pub key: String,
    pub read_only: bool,
}

/// Everything the push transport needs to publish a prepared working tree
#[derive(Debug, Clone, Copy)]
pub struct PushRequest<'a> {
    pub repository: &'a RepositoryRef,
    pub work_tree: &'a Path,
    pub branch: &'a str,
    pub message: &'a str,
    pub key: &'a KeyMaterial,
    /// known_hosts lines for the SSH endpoint; host key checking is relaxed when absent
    pub known_hosts: Option<&'a str>,
}

/// Creates and looks up the local cluster
#[async_trait]
pub trait ClusterProvider: Send + Sync + fmt::Debug {
    async fn cluster_exists(&self, name: &str) -> AdapterResult<bool>;

    /// Create the cluster; reports `Conflict` if it already exists
    async fn create_cluster(&self, name: &str, config: Option<&[u8]>) -> AdapterResult<()>;
}

/// Cluster management API
#[async_trait]
pub trait ClusterAdmin: Send + Sync + fmt::Debug {
    /// Apply a manifest (create or benign re-apply)
    async fn apply(&self, manifest: &[u8]) -> AdapterResult<()>;

    /// Whether the workload's rollout has completed
    async fn rollout_status(&self, workload: &WorkloadRef) -> AdapterResult<bool>;

    /// Run a command inside the first pod matching `pod_selector`
    async fn exec(&self, namespace: &str, pod_selector: &str, command: &[String]) -> AdapterResult<Vec<u8>>;
}

/// Git hosting API plus the push transport
#[async_trait]
pub trait GitHost: Send + Sync + fmt::Debug {
    /// SSH remote the push transport and GitOps controllers use
    fn remote_url(&self, repo: &RepositoryRef) -> String;

    async fn repository_exists(&self, repo: &RepositoryRef) -> AdapterResult<bool>;

    /// Create the repository; reports `Conflict` if it already exists
    async fn create_repository(&self, repo: &RepositoryRef) -> AdapterResult<()>;

    async fn list_deploy_keys(&self, repo: &RepositoryRef) -> AdapterResult<Vec<DeployKey>>;

    /// Register a deploy key; reports `Conflict` if the key or title is taken
    async fn add_deploy_key(
        &self,
        repo: &RepositoryRef,
        title: &str,
        public_key: &str,
        read_only: bool,
    ) -> AdapterResult<()>;

    /// Create or update a named repository secret
    async fn set_secret(&self, repo: &RepositoryRef, name: &str, value: &str) -> AdapterResult<()>;

    /// Force-push the work tree as a single commit; returns whether the remote changed
    async fn push(&self, request: PushRequest<'_>) -> AdapterResult<bool>;
}

/// SSH host key capture
#[async_trait]
pub trait KnownHostsCapture: Send + Sync + fmt::Debug {
    /// Scan `(host, port)` and return known_hosts lines
    async fn capture(&self, host: &str, port: u16) -> AdapterResult<Vec<String>>;
}

#[cfg(test)]
mod tests;
