#![cfg(test)]

//! Recording mock adapters shared by unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::adapter::error::{AdapterError, AdapterResult, ErrorClass};
use crate::adapter::{
    ClusterAdmin, ClusterProvider, DeployKey, GitHost, KnownHostsCapture, PushRequest, RepositoryRef, WorkloadRef,
};
use crate::poller::{CancelSignal, Poller, RetryPolicy};
use crate::utils::fs::{relative_files, to_slash_path};

/// Poller that never sleeps
pub fn test_poller(max_attempts: u32) -> Poller {
    Poller::new(RetryPolicy::immediate(max_attempts), CancelSignal::never())
}

/// Take one failure from a scripted budget, if any is left
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

// ===== CLUSTER PROVIDER =====

/// A cluster that becomes visible a fixed number of polls after creation
#[derive(Debug, Default)]
pub struct MockClusterProvider {
    /// name -> remaining "not yet visible" polls
    clusters: Mutex<HashMap<String, u32>>,
    visible_after: u32,
    pub exists_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    /// Transient failures returned by the next `create_cluster` calls
    pub create_failures: AtomicU32,
}

impl MockClusterProvider {
    pub fn new(visible_after: u32) -> Self {
        Self {
            visible_after,
            ..Default::default()
        }
    }

    /// Pre-existing, immediately visible cluster
    pub fn with_cluster(self, name: &str) -> Self {
        self.clusters.lock().unwrap().insert(name.to_string(), 0);
        self
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterProvider for MockClusterProvider {
    async fn cluster_exists(&self, name: &str) -> AdapterResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let mut clusters = self.clusters.lock().unwrap();
        match clusters.get_mut(name) {
            None => Ok(false),
            Some(0) => Ok(true),
            Some(remaining) => {
                *remaining -= 1;
                Ok(false)
            }
        }
    }

    async fn create_cluster(&self, name: &str, _config: Option<&[u8]>) -> AdapterResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.create_failures) {
            return Err(AdapterError::transient("kind", "docker daemon not reachable"));
        }
        let mut clusters = self.clusters.lock().unwrap();
        if clusters.contains_key(name) {
            return Err(AdapterError::conflict("kind", format!("node(s) already exist for a cluster with the name \"{}\"", name)));
        }
        clusters.insert(name.to_string(), self.visible_after);
        Ok(())
    }
}

// ===== CLUSTER ADMIN =====

/// Records applied manifests; rollouts turn ready after a number of polls
#[derive(Debug, Default)]
pub struct MockClusterAdmin {
    pub applied: Mutex<Vec<String>>,
    rollout_polls: Mutex<HashMap<String, u32>>,
    ready_after: u32,
    /// Workloads whose rollout never completes
    pub stuck: Mutex<BTreeSet<String>>,
    pub exec_output: Mutex<Vec<u8>>,
    pub exec_calls: Mutex<Vec<(String, String, Vec<String>)>>,
    /// Fatal error returned by every `apply`
    pub apply_error: Mutex<Option<AdapterError>>,
}

impl MockClusterAdmin {
    /// Rollouts report not-ready for `ready_after` polls, then ready
    pub fn new(ready_after: u32) -> Self {
        Self {
            ready_after,
            ..Default::default()
        }
    }

    pub fn with_exec_output(self, output: &str) -> Self {
        *self.exec_output.lock().unwrap() = output.as_bytes().to_vec();
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn rollout_polls(&self, workload: &str) -> u32 {
        self.rollout_polls.lock().unwrap().get(workload).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ClusterAdmin for MockClusterAdmin {
    async fn apply(&self, manifest: &[u8]) -> AdapterResult<()> {
        if let Some(err) = self.apply_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.applied
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(manifest).into_owned());
        Ok(())
    }

    async fn rollout_status(&self, workload: &WorkloadRef) -> AdapterResult<bool> {
        let key = workload.to_string();
        if self.stuck.lock().unwrap().contains(&key) {
            return Ok(false);
        }
        let mut polls = self.rollout_polls.lock().unwrap();
        let count = polls.entry(key).or_insert(0);
        *count += 1;
        Ok(*count > self.ready_after)
    }

    async fn exec(&self, namespace: &str, pod_selector: &str, command: &[String]) -> AdapterResult<Vec<u8>> {
        self.exec_calls
            .lock()
            .unwrap()
            .push((namespace.to_string(), pod_selector.to_string(), command.to_vec()));
        Ok(self.exec_output.lock().unwrap().clone())
    }
}

// ===== GIT HOST =====

/// One recorded push: the full synthesized tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub repository: RepositoryRef,
    pub branch: String,
    pub files: BTreeMap<String, String>,
    pub known_hosts: Option<String>,
}

#[derive(Debug, Default)]
struct GitState {
    repositories: HashSet<RepositoryRef>,
    keys: HashMap<RepositoryRef, Vec<DeployKey>>,
    secrets: HashMap<(RepositoryRef, String), String>,
    pushes: Vec<RecordedPush>,
}

/// In-memory git host recording every mutating call
#[derive(Debug, Default)]
pub struct MockGitHost {
    state: Mutex<GitState>,
    pub create_repository_calls: AtomicUsize,
    pub add_deploy_key_calls: AtomicUsize,
    pub set_secret_calls: AtomicUsize,
    pub push_calls: AtomicUsize,
    /// Answer the next `create_repository` with Conflict after creating it,
    /// as if another actor won the race
    pub race_on_create: Mutex<bool>,
    /// Transient failures returned by the next pushes
    pub push_failures: AtomicU32,
    /// Error returned by every push
    pub push_error: Mutex<Option<AdapterError>>,
}

impl MockGitHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(self, repo: &RepositoryRef) -> Self {
        self.state.lock().unwrap().repositories.insert(repo.clone());
        self
    }

    /// Register a deploy key directly, bypassing call counting
    pub fn with_deploy_key(self, repo: &RepositoryRef, title: &str, key: &str) -> Self {
        self.state.lock().unwrap().keys.entry(repo.clone()).or_default().push(DeployKey {
            title: title.to_string(),
            key: key.to_string(),
            read_only: true,
        });
        self
    }

    pub fn deploy_keys(&self, repo: &RepositoryRef) -> Vec<DeployKey> {
        self.state.lock().unwrap().keys.get(repo).cloned().unwrap_or_default()
    }

    pub fn secret(&self, repo: &RepositoryRef, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(repo.clone(), name.to_string()))
            .cloned()
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn creates(&self) -> usize {
        self.create_repository_calls.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn key_adds(&self) -> usize {
        self.add_deploy_key_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitHost for MockGitHost {
    fn remote_url(&self, repo: &RepositoryRef) -> String {
        format!("ssh://git@localhost:2222/{}/{}.git", repo.owner, repo.name)
    }

    async fn repository_exists(&self, repo: &RepositoryRef) -> AdapterResult<bool> {
        Ok(self.state.lock().unwrap().repositories.contains(repo))
    }

    async fn create_repository(&self, repo: &RepositoryRef) -> AdapterResult<()> {
        self.create_repository_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let raced = std::mem::take(&mut *self.race_on_create.lock().unwrap());
        if !state.repositories.insert(repo.clone()) || raced {
            return Err(AdapterError::conflict("git-host", format!("repository {} already exists", repo)));
        }
        Ok(())
    }

    async fn list_deploy_keys(&self, repo: &RepositoryRef) -> AdapterResult<Vec<DeployKey>> {
        let state = self.state.lock().unwrap();
        if !state.repositories.contains(repo) {
            return Err(AdapterError::new(ErrorClass::Fatal, "git-host", format!("repository {} not found", repo)));
        }
        Ok(state.keys.get(repo).cloned().unwrap_or_default())
    }

    async fn add_deploy_key(
        &self,
        repo: &RepositoryRef,
        title: &str,
        public_key: &str,
        read_only: bool,
    ) -> AdapterResult<()> {
        self.add_deploy_key_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let keys = state.keys.entry(repo.clone()).or_default();
        if keys.iter().any(|k| k.title == title || k.key == public_key) {
            return Err(AdapterError::conflict("git-host", "key already exists"));
        }
        keys.push(DeployKey {
            title: title.to_string(),
            key: public_key.to_string(),
            read_only,
        });
        Ok(())
    }

    async fn set_secret(&self, repo: &RepositoryRef, name: &str, value: &str) -> AdapterResult<()> {
        self.set_secret_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert((repo.clone(), name.to_string()), value.to_string());
        Ok(())
    }

    async fn push(&self, request: PushRequest<'_>) -> AdapterResult<bool> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.push_error.lock().unwrap().clone() {
            return Err(err);
        }
        if take_failure(&self.push_failures) {
            return Err(AdapterError::transient("git", "ssh: connect to host localhost port 2222: Connection refused"));
        }

        let mut files = BTreeMap::new();
        let relative = relative_files(request.work_tree).map_err(|e| AdapterError::fatal("git", e.to_string()))?;
        for path in relative {
            let content = fs::read_to_string(request.work_tree.join(&path)).map_err(|e| AdapterError::fatal("git", e.to_string()))?;
            files.insert(to_slash_path(&path), content);
        }

        let mut state = self.state.lock().unwrap();
        let changed = state
            .pushes
            .iter()
            .rev()
            .find(|push| &push.repository == request.repository)
            .map_or(true, |last| last.files != files);
        state.pushes.push(RecordedPush {
            repository: request.repository.clone(),
            branch: request.branch.to_string(),
            files,
            known_hosts: request.known_hosts.map(str::to_string),
        });
        Ok(changed)
    }
}

// ===== KNOWN HOSTS =====

#[derive(Debug, Default)]
pub struct MockKeyscan {
    lines: Vec<String>,
    pub calls: AtomicUsize,
    /// Transient "not listening yet" failures before the scan succeeds
    pub failures: AtomicU32,
}

impl MockKeyscan {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|line| line.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_first(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl KnownHostsCapture for MockKeyscan {
    async fn capture(&self, host: &str, port: u16) -> AdapterResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(AdapterError::transient("ssh-keyscan", format!("{}:{} connection refused", host, port)));
        }
        Ok(self.lines.clone())
    }
}

/// Shared handles for assertions after the adapters move into an orchestrator
#[derive(Debug, Clone)]
pub struct MockAdapters {
    pub provider: Arc<MockClusterProvider>,
    pub cluster: Arc<MockClusterAdmin>,
    pub git: Arc<MockGitHost>,
    pub keyscan: Arc<MockKeyscan>,
}

impl MockAdapters {
    pub fn new(cluster_visible_after: u32, rollout_ready_after: u32) -> Self {
        Self {
            provider: Arc::new(MockClusterProvider::new(cluster_visible_after)),
            cluster: Arc::new(MockClusterAdmin::new(rollout_ready_after)),
            git: Arc::new(MockGitHost::new()),
            keyscan: Arc::new(MockKeyscan::new(&["[localhost]:2222 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHostKey"])),
        }
    }

    pub fn adapters(&self) -> crate::stage_manager::bootstrap_stages::Adapters {
        crate::stage_manager::bootstrap_stages::Adapters {
            cluster_provider: self.provider.clone(),
            cluster: self.cluster.clone(),
            git_host: Some(self.git.clone()),
            keyscan: self.keyscan.clone(),
        }
    }
}

// ===== SCRIPTED STAGES =====

/// Shared record of what scripted stages did, in order
#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Position of `event`, panicking if it never happened
    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event '{}' not recorded in {:?}", event, self.events()))
    }

    pub fn happened(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    FailFatal,
    Panic,
    /// The predicate never holds
    NeverConverge,
}

/// Stage whose action and predicate follow a script
#[derive(Debug)]
pub struct ScriptedStage {
    id: String,
    journal: Arc<Journal>,
    script: Script,
    ready_after: u32,
    polls: AtomicU32,
    work: std::time::Duration,
}

impl ScriptedStage {
    pub fn new(id: &str, journal: &Arc<Journal>) -> Self {
        Self {
            id: id.to_string(),
            journal: journal.clone(),
            script: Script::Succeed,
            ready_after: 0,
            polls: AtomicU32::new(0),
            work: std::time::Duration::ZERO,
        }
    }

    pub fn script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    /// Predicate reports not-ready for `polls` checks first
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    /// Time the action takes
    pub fn working_for(mut self, work: std::time::Duration) -> Self {
        self.work = work;
        self
    }

    pub fn arc(self) -> Arc<dyn crate::stage_manager::Stage> {
        Arc::new(self)
    }
}

#[async_trait]
impl crate::stage_manager::Stage for ScriptedStage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        _context: &crate::stage_manager::StageContext,
    ) -> crate::kernel::error::Result<crate::stage_manager::StageOutcome> {
        self.journal.record(format!("start:{}", self.id));
        let now = self.journal.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.peak.fetch_max(now, Ordering::SeqCst);
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.journal.running.fetch_sub(1, Ordering::SeqCst);

        match self.script {
            Script::Panic => panic!("scripted panic in {}", self.id),
            Script::FailFatal => Err(AdapterError::fatal("scripted", format!("{} refused", self.id)).into()),
            Script::Succeed | Script::NeverConverge => Ok(crate::stage_manager::StageOutcome::Created),
        }
    }

    async fn is_converged(&self, _context: &crate::stage_manager::StageContext) -> AdapterResult<bool> {
        if self.script == Script::NeverConverge {
            return Ok(false);
        }
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = polls > self.ready_after;
        if ready {
            self.journal.record(format!("converged:{}", self.id));
        }
        Ok(ready)
    }
}
