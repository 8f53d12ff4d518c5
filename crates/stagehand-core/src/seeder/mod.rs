//! # Stagehand Repository Seeder
//!
//! Synthesizes a working tree from [`SourceMapping`]s, fingerprints it and
//! publishes it to the git host as a single force-pushed commit.
//!
//! The seeded repository is a generated mirror, so history is never kept.
//! The push is skipped entirely when the tree's [`RepositoryFingerprint`]
//! equals the last successfully pushed one.
pub mod error;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::adapter::{GitHost, PushRequest, RepositoryRef};
use crate::credentials::KeyMaterial;
use crate::kernel::constants::{DEFAULT_BRANCH, SEED_COMMIT_MESSAGE, SEED_PREFIX};
use crate::poller::Poller;
use crate::storage::key_segment;
use crate::utils::fs::{is_contained_relative, relative_files, to_slash_path};

pub use error::SeedError;

/// Where the content of one mapping comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// A directory copied recursively (`.git` excluded)
    Tree(PathBuf),
    /// A single file copied verbatim
    File(PathBuf),
    /// A file rendered with `${VAR}` substitution
    Template(PathBuf),
    /// Literal content rendered with `${VAR}` substitution
    Inline(String),
}

/// Pairs a source with its destination inside the synthesized tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    #[serde(flatten)]
    pub source: Source,
    /// Relative path; a directory for `tree`, a file path otherwise
    #[serde(default)]
    pub destination: PathBuf,
    /// Variables for this mapping, overriding the seeder's globals
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl SourceMapping {
    pub fn new(source: Source, destination: impl Into<PathBuf>) -> Self {
        Self {
            source,
            destination: destination.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn validate_destination(&self) -> Result<(), SeedError> {
        let invalid = |reason: &str| SeedError::InvalidDestination {
            destination: self.destination.clone(),
            reason: reason.to_string(),
        };
        if !is_contained_relative(&self.destination) {
            return Err(invalid("must be a relative path inside the repository"));
        }
        let is_root = to_slash_path(&self.destination).is_empty();
        if is_root && !matches!(self.source, Source::Tree(_)) {
            return Err(invalid("file sources need a file path"));
        }
        if self.destination.components().any(|c| c.as_os_str() == ".git") {
            return Err(invalid("must not write into .git"));
        }
        Ok(())
    }
}

/// Deterministic content hash of a synthesized tree: SHA-256 over every file
/// in slash-path order, each contributing its path, a NUL byte, its length
/// (u64 little endian) and its content. Rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryFingerprint(String);

impl RepositoryFingerprint {
    pub fn of_tree(root: &Path) -> Result<Self, SeedError> {
        let files = relative_files(root).map_err(|e| SeedError::io(e, "walk", root.to_path_buf()))?;
        let mut hasher = Sha256::new();
        let mut buffer = Vec::new();
        for relative in files {
            let full = root.join(&relative);
            buffer.clear();
            fs::File::open(&full)
                .and_then(|mut file| file.read_to_end(&mut buffer))
                .map_err(|e| SeedError::io(e, "read", full.clone()))?;
            hasher.update(to_slash_path(&relative).as_bytes());
            hasher.update([0u8]);
            hasher.update((buffer.len() as u64).to_le_bytes());
            hasher.update(&buffer);
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret store key holding the last pushed fingerprint of a repository
pub fn ledger_key(repository: &RepositoryRef) -> String {
    format!(
        "{}/{}/{}/fingerprint",
        SEED_PREFIX,
        key_segment(&repository.owner),
        key_segment(&repository.name)
    )
}

/// Result of one seed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedResult {
    pub fingerprint: String,
    /// Whether the push transport was invoked
    pub pushed: bool,
}

/// A synthesized working tree, removed on drop
#[derive(Debug)]
pub struct WorkingTree {
    dir: TempDir,
    fingerprint: RepositoryFingerprint,
}

impl WorkingTree {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn fingerprint(&self) -> &RepositoryFingerprint {
        &self.fingerprint
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), SeedError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SeedError::io(e, "create_dir_all", parent.to_path_buf()))?;
    }
    fs::write(path, contents).map_err(|e| SeedError::io(e, "write", path.to_path_buf()))
}

/// Materialize `sources` into a fresh scratch directory and fingerprint it.
/// Later mappings overwrite earlier ones at the same destination.
pub fn synthesize(sources: &[SourceMapping], globals: &BTreeMap<String, String>) -> Result<WorkingTree, SeedError> {
    let dir = TempDir::new().map_err(|e| SeedError::io(e, "create_temp_dir", std::env::temp_dir()))?;
    let root = dir.path();

    for mapping in sources {
        mapping.validate_destination()?;
        let target = root.join(&mapping.destination);
        let vars = || {
            let mut merged = globals.clone();
            merged.extend(mapping.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        };

        match &mapping.source {
            Source::Tree(source_root) => {
                let files = relative_files(source_root)
                    .map_err(|e| SeedError::io(e, "walk", source_root.clone()))?;
                if files.is_empty() && !source_root.is_dir() {
                    return Err(SeedError::io(
                        std::io::Error::new(std::io::ErrorKind::NotFound, "source tree does not exist"),
                        "walk",
                        source_root.clone(),
                    ));
                }
                for relative in files {
                    let from = source_root.join(&relative);
                    let contents = fs::read(&from).map_err(|e| SeedError::io(e, "read", from.clone()))?;
                    write_file(&target.join(&relative), &contents)?;
                }
            }
            Source::File(path) => {
                let contents = fs::read(path).map_err(|e| SeedError::io(e, "read", path.clone()))?;
                write_file(&target, &contents)?;
            }
            Source::Template(path) => {
                let raw = fs::read(path).map_err(|e| SeedError::io(e, "read", path.clone()))?;
                let text = String::from_utf8(raw).map_err(|_| SeedError::NonUtf8Template { path: path.clone() })?;
                let rendered = template::render(&text, &vars(), &mapping.destination)?;
                write_file(&target, rendered.as_bytes())?;
            }
            Source::Inline(text) => {
                let rendered = template::render(text, &vars(), &mapping.destination)?;
                write_file(&target, rendered.as_bytes())?;
            }
        }
    }

    let fingerprint = RepositoryFingerprint::of_tree(root)?;
    Ok(WorkingTree { dir, fingerprint })
}

/// Publishes synthesized trees through a [`GitHost`]
#[derive(Debug, Clone)]
pub struct RepositorySeeder {
    host: Arc<dyn GitHost>,
    branch: String,
    message: String,
    vars: BTreeMap<String, String>,
}

impl RepositorySeeder {
    pub fn new(host: Arc<dyn GitHost>) -> Self {
        Self {
            host,
            branch: DEFAULT_BRANCH.to_string(),
            message: SEED_COMMIT_MESSAGE.to_string(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = branch.to_string();
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    /// Variables available to every mapping
    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    /// Synthesize the tree off the async runtime
    pub async fn synthesize(&self, sources: &[SourceMapping]) -> Result<WorkingTree, SeedError> {
        let sources = sources.to_vec();
        let vars = self.vars.clone();
        tokio::task::spawn_blocking(move || synthesize(&sources, &vars))
            .await
            .map_err(|e| SeedError::Synthesis(e.to_string()))?
    }

    /// Synthesize, fingerprint and push unless the fingerprint equals
    /// `last_fingerprint`. Push failures are retried under `poller`.
    pub async fn seed(
        &self,
        poller: &Poller,
        sources: &[SourceMapping],
        repository: &RepositoryRef,
        last_fingerprint: &str,
        key: &KeyMaterial,
        known_hosts: Option<&str>,
    ) -> Result<SeedResult, SeedError> {
        let tree = self.synthesize(sources).await?;
        let fingerprint = tree.fingerprint().to_string();

        if fingerprint == last_fingerprint {
            log::info!("{} unchanged ({}), skipping push", repository, fingerprint);
            return Ok(SeedResult {
                fingerprint,
                pushed: false,
            });
        }

        let request = PushRequest {
            repository,
            work_tree: tree.path(),
            branch: &self.branch,
            message: &self.message,
            key,
            known_hosts,
        };
        let host = self.host.as_ref();
        let changed = poller
            .retry(&format!("push {}", repository), move || host.push(request))
            .await?;
        log::info!(
            "Seeded {} with {} (remote {})",
            repository,
            fingerprint,
            if changed { "updated" } else { "already matched" }
        );
        Ok(SeedResult {
            fingerprint,
            pushed: true,
        })
    }
}
