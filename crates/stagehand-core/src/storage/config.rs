//! Orchestrator configuration: a serde document describing adapters, retry
//! defaults, template variables and the ordered stage list.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{RepositoryRef, WorkloadRef};
use crate::kernel::constants::{DEFAULT_BRANCH, DEFAULT_STATE_DIR};
use crate::poller::RetryPolicy;
use crate::seeder::{Source, SourceMapping};
use crate::stage_manager::dependency::DependencyGraph;
use crate::storage::error::StorageSystemError;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// Partial retry policy; unset fields fall back to the enclosing default
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl RetryPolicyConfig {
    pub fn resolve(&self, base: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            initial_delay: self
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.initial_delay),
            multiplier: self.multiplier.unwrap_or(base.multiplier),
            max_delay: self.max_delay_ms.map(Duration::from_millis).unwrap_or(base.max_delay),
        }
    }

    fn validate(&self, scope: &str) -> Result<(), StorageSystemError> {
        if self.max_attempts == Some(0) {
            return Err(StorageSystemError::invalid_config(format!(
                "{}: retry.max_attempts must be at least 1",
                scope
            )));
        }
        if let Some(multiplier) = self.multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(StorageSystemError::invalid_config(format!(
                    "{}: retry.multiplier must be a finite number >= 1.0",
                    scope
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub retry: RetryPolicyConfig,
}

fn default_kind_binary() -> String {
    "kind".to_string()
}

fn default_kubectl_binary() -> String {
    "kubectl".to_string()
}

fn default_keyscan_binary() -> String {
    "ssh-keyscan".to_string()
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_kind_binary")]
    pub kind_binary: String,
    #[serde(default = "default_kubectl_binary")]
    pub kubectl_binary: String,
    #[serde(default = "default_keyscan_binary")]
    pub keyscan_binary: String,
    /// kubeconfig context passed to kubectl
    #[serde(default)]
    pub context: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kind_binary: default_kind_binary(),
            kubectl_binary: default_kubectl_binary(),
            keyscan_binary: default_keyscan_binary(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHostConfig {
    /// Web root of the git host, e.g. `http://localhost:3000`
    pub api_url: String,
    /// SSH clone prefix, e.g. `ssh://git@localhost:2222`
    pub ssh_url: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password; wins over `password`
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
}

impl GitHostConfig {
    pub fn resolve_password(&self) -> Result<Option<String>, StorageSystemError> {
        match &self.password_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                StorageSystemError::invalid_config(format!(
                    "git_host.password_env: environment variable '{}' is not set",
                    var
                ))
            }),
            None => Ok(self.password.clone()),
        }
    }
}

/// Kubernetes Secret receiving the deploy key for the GitOps controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSecretSpec {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `host:port` of a known-hosts capture to embed
    #[serde(default)]
    pub known_hosts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployKeySpec {
    pub key_name: String,
    pub repository: RepositoryRef,
    /// Deploy key title on the git host; defaults to `key_name`
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_true")]
    pub read_only: bool,
    #[serde(default)]
    pub cluster_secret: Option<ClusterSecretSpec>,
    /// Repository secret to receive the private key
    #[serde(default)]
    pub repository_secret: Option<String>,
}

impl DeployKeySpec {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.key_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSelectorSpec {
    pub namespace: String,
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMapSpec {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownHostsSpec {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Scan from inside this pod instead of from the local host
    #[serde(default)]
    pub from_pod: Option<PodSelectorSpec>,
    #[serde(default)]
    pub config_map: Option<ConfigMapSpec>,
}

impl KnownHostsSpec {
    /// `host:port`, the label other stages use to reference this capture
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSpec {
    pub repository: RepositoryRef,
    /// Key pair used for the push; registered as a writable deploy key
    pub key_name: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub message: Option<String>,
    /// `host:port` of a known-hosts capture for strict host key checking
    #[serde(default)]
    pub known_hosts: Option<String>,
    pub sources: Vec<SourceMapping>,
}

/// Stage body, selected by the `kind` field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StageSpec {
    Cluster {
        name: String,
        #[serde(default)]
        config: Option<PathBuf>,
    },
    Manifest {
        manifests: Vec<PathBuf>,
        #[serde(default)]
        rollouts: Vec<WorkloadRef>,
    },
    Rollout {
        rollouts: Vec<WorkloadRef>,
    },
    Repository {
        repository: RepositoryRef,
    },
    DeployKey(DeployKeySpec),
    KnownHosts(KnownHostsSpec),
    Seed(SeedSpec),
}

impl StageSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            StageSpec::Cluster { .. } => "cluster",
            StageSpec::Manifest { .. } => "manifest",
            StageSpec::Rollout { .. } => "rollout",
            StageSpec::Repository { .. } => "repository",
            StageSpec::DeployKey(_) => "deploy-key",
            StageSpec::KnownHosts(_) => "known-hosts",
            StageSpec::Seed(_) => "seed",
        }
    }

    pub fn needs_git_host(&self) -> bool {
        matches!(
            self,
            StageSpec::Repository { .. } | StageSpec::DeployKey(_) | StageSpec::Seed(_)
        )
    }

    fn resolve_paths(&mut self, base: &Path) {
        match self {
            StageSpec::Cluster { config: Some(path), .. } => resolve(path, base),
            StageSpec::Manifest { manifests, .. } => manifests.iter_mut().for_each(|p| resolve(p, base)),
            StageSpec::Seed(seed) => {
                for mapping in &mut seed.sources {
                    match &mut mapping.source {
                        Source::Tree(path) | Source::File(path) | Source::Template(path) => resolve(path, base),
                        Source::Inline(_) => {}
                    }
                }
            }
            _ => {}
        }
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicyConfig>,
    #[serde(flatten)]
    pub spec: StageSpec,
}

impl StageConfig {
    /// Effective retry policy given the document defaults
    pub fn policy(&self, defaults: &RetryPolicy) -> RetryPolicy {
        match &self.retry {
            Some(retry) => retry.resolve(defaults),
            None => *defaults,
        }
    }
}

/// Top-level orchestrator configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Worker-pool size; defaults to the number of root stages
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub git_host: Option<GitHostConfig>,
    /// Template variables available to every seed source
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    pub stages: Vec<StageConfig>,
}

impl OrchestratorConfig {
    /// Parse a document without touching the filesystem
    pub fn parse(data: &str, format: ConfigFormat) -> Result<Self, StorageSystemError> {
        let deserialization_error = |name: &str, source: Box<dyn std::error::Error + Send + Sync>| {
            StorageSystemError::DeserializationError {
                format: name.to_string(),
                source,
            }
        };
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| deserialization_error("json", Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| deserialization_error("yaml", Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| deserialization_error("toml", Box::new(e))),
        }
    }

    /// Retry policy used by stages without an override
    pub fn default_policy(&self) -> RetryPolicy {
        self.defaults.retry.resolve(&RetryPolicy::default())
    }

    /// Make every relative path absolute against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        resolve(&mut self.state_dir, base);
        for stage in &mut self.stages {
            stage.spec.resolve_paths(base);
        }
    }

    pub fn validate(&self) -> Result<(), StorageSystemError> {
        if self.stages.is_empty() {
            return Err(StorageSystemError::invalid_config("no stages declared"));
        }
        if self.concurrency == Some(0) {
            return Err(StorageSystemError::invalid_config("concurrency must be at least 1"));
        }
        self.defaults.retry.validate("defaults")?;

        let mut seen = HashSet::new();
        let mut graph = DependencyGraph::new();
        let mut captures: HashMap<String, Vec<&str>> = HashMap::new();
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                return Err(StorageSystemError::invalid_config("stage id must not be empty"));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(StorageSystemError::invalid_config(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
            if let Some(retry) = &stage.retry {
                retry.validate(&format!("stage '{}'", stage.id))?;
            }
            if stage.spec.needs_git_host() && self.git_host.is_none() {
                return Err(StorageSystemError::invalid_config(format!(
                    "stage '{}' ({}) requires a git_host section",
                    stage.id,
                    stage.spec.kind()
                )));
            }
            if let StageSpec::KnownHosts(spec) = &stage.spec {
                captures.entry(spec.label()).or_default().push(stage.id.as_str());
            }
            if let StageSpec::Seed(seed) = &stage.spec {
                for mapping in &seed.sources {
                    mapping
                        .validate_destination()
                        .map_err(|e| StorageSystemError::invalid_config(format!("stage '{}': {}", stage.id, e)))?;
                }
            }
            graph.add_node(&stage.id);
            for dependency in &stage.depends_on {
                graph.add_dependency(&stage.id, dependency);
            }
        }

        graph
            .validate()
            .map_err(|e| StorageSystemError::invalid_config(e.to_string()))?;

        // Known-hosts references must name a capture stage upstream of the consumer
        for stage in &self.stages {
            let reference = match &stage.spec {
                StageSpec::Seed(seed) => seed.known_hosts.as_ref(),
                StageSpec::DeployKey(key) => key.cluster_secret.as_ref().and_then(|s| s.known_hosts.as_ref()),
                _ => None,
            };
            let Some(label) = reference else { continue };
            let Some(capturing) = captures.get(label) else {
                return Err(StorageSystemError::invalid_config(format!(
                    "stage '{}' references known hosts '{}' but no known-hosts stage captures it",
                    stage.id, label
                )));
            };
            if !capturing.iter().any(|id| graph.depends_on_transitively(&stage.id, id)) {
                return Err(StorageSystemError::invalid_config(format!(
                    "stage '{}' references known hosts '{}' but does not depend on '{}'",
                    stage.id,
                    label,
                    capturing.join("' or '")
                )));
            }
        }
        Ok(())
    }
}

/// Load, resolve and validate a configuration file
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, StorageSystemError> {
    let format = ConfigFormat::from_path(path).ok_or_else(|| {
        StorageSystemError::UnsupportedConfigFormat(
            path.extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        )
    })?;

    let data = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageSystemError::ConfigNotFound(path.to_path_buf())
        } else {
            StorageSystemError::io(e, "read_config", path.to_path_buf())
        }
    })?;

    let mut config = OrchestratorConfig::parse(&data, format)?;
    let base = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.resolve_paths(&base);
    config.validate()?;
    log::debug!(
        "Loaded configuration {} ({} stage(s), {} format)",
        path.display(),
        config.stages.len(),
        format.extension()
    );
    Ok(config)
}
